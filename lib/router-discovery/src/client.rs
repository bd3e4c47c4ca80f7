//! HTTP client for the gateway's registry endpoints

use async_trait::async_trait;
use fleet_api::{InstanceView, RegisterInstance};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use crate::{DiscoveryError, RegistryApi, Result};

/// RegistryClient talks to the registry served under `/registry` by the
/// gateway process
#[derive(Clone)]
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
}

impl RegistryClient {
    /// Create a client for the gateway at `base_url`, e.g. `http://localhost:8888`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn instances_url(&self) -> String {
        format!("{}/registry/instances", self.base_url)
    }

    fn instance_url(&self, service_name: &str, instance_id: &str) -> String {
        format!("{}/{}/{}", self.instances_url(), service_name, instance_id)
    }

    async fn read_view(response: reqwest::Response) -> Result<InstanceView> {
        response
            .json::<InstanceView>()
            .await
            .map_err(|e| DiscoveryError::Transport(format!("decoding registry response: {}", e)))
    }
}

fn transport(error: reqwest::Error) -> DiscoveryError {
    DiscoveryError::Transport(error.to_string())
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn register(&self, registration: &RegisterInstance) -> Result<InstanceView> {
        let response = self
            .http
            .post(self.instances_url())
            .json(registration)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            status if status.is_success() => Self::read_view(response).await,
            StatusCode::BAD_REQUEST => {
                let reason = response.text().await.unwrap_or_default();
                Err(DiscoveryError::Rejected(reason))
            }
            status => Err(DiscoveryError::UnexpectedStatus(status.as_u16())),
        }
    }

    async fn heartbeat(&self, service_name: &str, instance_id: &str) -> Result<InstanceView> {
        let url = format!("{}/heartbeat", self.instance_url(service_name, instance_id));
        let response = self.http.put(url).send().await.map_err(transport)?;

        match response.status() {
            status if status.is_success() => Self::read_view(response).await,
            StatusCode::NOT_FOUND => Err(DiscoveryError::NotFound {
                service: service_name.to_string(),
                instance_id: instance_id.to_string(),
            }),
            status => Err(DiscoveryError::UnexpectedStatus(status.as_u16())),
        }
    }

    async fn deregister(&self, service_name: &str, instance_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.instance_url(service_name, instance_id))
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => {
                debug!("Deregistered {}/{}", service_name, instance_id);
                Ok(())
            }
            status => Err(DiscoveryError::UnexpectedStatus(status.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = RegistryClient::new("http://localhost:8888/").unwrap();
        assert_eq!(client.instances_url(), "http://localhost:8888/registry/instances");
        assert_eq!(
            client.instance_url("client-service", "a1"),
            "http://localhost:8888/registry/instances/client-service/a1"
        );
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = RegistryClient::new(format!("http://127.0.0.1:{}", port)).unwrap();
        let result = client.heartbeat("client-service", "a").await;
        assert!(matches!(result, Err(DiscoveryError::Transport(_))));
    }
}
