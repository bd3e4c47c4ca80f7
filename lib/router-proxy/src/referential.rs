//! Vehicle → client reference policy
//!
//! A vehicle stores the id of its client, which lives in another service's
//! dataset. Nothing enforces that the client exists. In `Unchecked` mode the
//! gateway forwards vehicle writes as they are and dangling references are a
//! normal, observable state. In `Checked` mode the gateway looks the client
//! up before forwarding a create or update and refuses the write when the
//! client is missing or cannot be reached.

use async_trait::async_trait;
use fleet_api::{ClientId, CLIENTS_PATH};
use hyper::Method;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::forwarder::ProxyRequest;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceMode {
    /// Store references without looking at the client service
    #[default]
    Unchecked,
    /// Verify the client exists before a vehicle write is forwarded
    Checked,
}

impl FromStr for ReferenceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unchecked" => Ok(ReferenceMode::Unchecked),
            "checked" => Ok(ReferenceMode::Checked),
            other => Err(format!("unknown reference mode: {}", other)),
        }
    }
}

/// Result of looking a client up through the gateway
#[derive(Clone, Debug, PartialEq)]
pub enum LookupOutcome {
    Found,
    Missing,
    /// The client service could not give an answer
    Unreachable(String),
}

#[async_trait]
pub trait ClientLookup: Send + Sync {
    async fn lookup_client(&self, client_id: ClientId) -> LookupOutcome;
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReferencePolicy {
    pub mode: ReferenceMode,
    /// Logical service owning vehicles
    pub vehicle_service: String,
    /// Logical service owning clients
    pub client_service: String,
    /// Collection path clients are fetched under
    pub client_prefix: String,
}

impl Default for ReferencePolicy {
    fn default() -> Self {
        Self {
            mode: ReferenceMode::Unchecked,
            vehicle_service: "vehicle-service".to_string(),
            client_service: "client-service".to_string(),
            client_prefix: CLIENTS_PATH.to_string(),
        }
    }
}

impl ReferencePolicy {
    /// Whether a request routed to `service` is a vehicle write to check
    pub fn applies_to(&self, service: &str, method: &Method) -> bool {
        self.mode == ReferenceMode::Checked
            && service == self.vehicle_service
            && (method == Method::POST || method == Method::PUT)
    }

    /// Path of a single client in the client service
    pub fn client_path(&self, client_id: ClientId) -> String {
        format!("{}/{}", self.client_prefix.trim_end_matches('/'), client_id)
    }

    /// The `clientId` a vehicle document refers to, if any. Bodies that are
    /// not JSON objects are left to the vehicle service to reject.
    pub fn client_reference(body: &[u8]) -> Option<ClientId> {
        let document: serde_json::Value = serde_json::from_slice(body).ok()?;
        match document.get("clientId")? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Validate the client reference of a request routed to `service`
    pub async fn check(
        &self,
        lookup: &dyn ClientLookup,
        service: &str,
        request: &ProxyRequest,
    ) -> Result<(), GatewayError> {
        if !self.applies_to(service, &request.method) {
            return Ok(());
        }
        let Some(client_id) = Self::client_reference(&request.body) else {
            return Ok(());
        };

        match lookup.lookup_client(client_id).await {
            LookupOutcome::Found => {
                debug!("Client {} exists, forwarding vehicle write", client_id);
                Ok(())
            }
            LookupOutcome::Missing => {
                warn!(client = client_id, "Rejected vehicle write with dangling client reference");
                Err(GatewayError::DanglingReference(client_id))
            }
            LookupOutcome::Unreachable(reason) => {
                warn!(
                    client = client_id,
                    reason = %reason,
                    "Client service unreachable during reference check"
                );
                Err(GatewayError::DependencyUnavailable {
                    service: self.client_service.clone(),
                    reason,
                })
            }
        }
    }
}
