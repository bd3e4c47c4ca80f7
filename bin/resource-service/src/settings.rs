//! Resource service settings, read from the environment

use anyhow::{bail, Context, Result};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Client,
    Vehicle,
}

impl ResourceKind {
    pub fn default_service_name(&self) -> &'static str {
        match self {
            ResourceKind::Client => "client-service",
            ResourceKind::Vehicle => "vehicle-service",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub kind: ResourceKind,
    pub service_name: String,
    pub bind_host: String,
    /// 0 binds an ephemeral port, which is then advertised
    pub port: u16,
    pub advertise_host: String,
    pub gateway_url: String,
    pub heartbeat_interval: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = match var("RESOURCE_KIND").as_deref().map(str::trim) {
            Some("client") | None => ResourceKind::Client,
            Some("vehicle") => ResourceKind::Vehicle,
            Some(other) => bail!("RESOURCE_KIND must be client or vehicle, got {}", other),
        };

        let port = match var("PORT") {
            Some(port) => port.trim().parse().with_context(|| format!("invalid PORT {}", port))?,
            None => 0,
        };

        let heartbeat_secs: u64 = match var("HEARTBEAT_INTERVAL_SECS") {
            Some(secs) => secs
                .trim()
                .parse()
                .with_context(|| format!("invalid HEARTBEAT_INTERVAL_SECS {}", secs))?,
            None => 5,
        };
        if heartbeat_secs == 0 {
            bail!("HEARTBEAT_INTERVAL_SECS must be positive");
        }

        Ok(Self {
            kind,
            service_name: var("SERVICE_NAME")
                .unwrap_or_else(|| kind.default_service_name().to_string()),
            bind_host: var("BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            advertise_host: var("ADVERTISE_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            gateway_url: var("GATEWAY_URL").unwrap_or_else(|| "http://127.0.0.1:8888".to_string()),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        })
    }
}
