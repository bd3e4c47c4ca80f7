//! Registration wire format between service instances and the registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Liveness state of a registered instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Heartbeating within the suspect threshold
    Healthy,
    /// Missed heartbeats or failed a probe; only used when nothing is Healthy
    Suspect,
    /// Past the dead threshold; evicted and never selectable
    Dead,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Healthy => "healthy",
            InstanceStatus::Suspect => "suspect",
            InstanceStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /registry/instances`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInstance {
    /// Logical service name, e.g. "client-service"
    pub service_name: String,

    /// Unique instance id; the registry generates one when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Host the instance is reachable on
    pub host: String,

    /// Port the instance listens on
    pub port: u16,
}

/// Registry entry as reported by the registry API
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub service_name: String,
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub registered_at: DateTime<Utc>,
    /// Milliseconds since the last heartbeat, at the time of the read
    pub heartbeat_age_ms: u64,
}
