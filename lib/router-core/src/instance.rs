//! Registered service instances
use chrono::{DateTime, Utc};
use fleet_api::{InstanceStatus, InstanceView};
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub last_heartbeat: Instant,
    pub registered_at: DateTime<Utc>,
}

impl ServiceInstance {
    /// `host:port` of the instance
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL requests to this instance are built on
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn same_address(&self, host: &str, port: u16) -> bool {
        self.port == port && self.host.eq_ignore_ascii_case(host)
    }

    pub fn view(&self, now: Instant) -> InstanceView {
        InstanceView {
            service_name: self.service_name.clone(),
            instance_id: self.instance_id.clone(),
            host: self.host.clone(),
            port: self.port,
            status: self.status,
            registered_at: self.registered_at,
            heartbeat_age_ms: now.saturating_duration_since(self.last_heartbeat).as_millis() as u64,
        }
    }
}
