//! Gateway configuration loaded from YAML with environment overrides

use anyhow::{bail, Context, Result};
use router_core::{HealthThresholds, RouteRule, RoutingTable};
use router_proxy::{
    HealthCheckConfig, ProbeConfig, ReferenceMode, ReferencePolicy, RetryPolicy, TimeoutPolicy,
    TrafficPolicy,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen: String,
    pub routes: Vec<RouteRule>,
    pub health: HealthSection,
    pub forward: ForwardSection,
    pub references: ReferencesSection,
    /// Route to Suspect instances when a service has no Healthy one
    pub degraded_fallback: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub sweep_interval_secs: u64,
    pub suspect_after_secs: u64,
    pub dead_after_secs: u64,
    pub probe: ProbeSection,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub enabled: bool,
    pub path: String,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ForwardSection {
    pub attempt_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Make the single failover attempt on another instance
    pub retry: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReferencesSection {
    pub mode: ReferenceMode,
    pub vehicle_service: String,
    pub client_service: String,
    pub client_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8888".to_string(),
            routes: Vec::new(),
            health: HealthSection::default(),
            forward: ForwardSection::default(),
            references: ReferencesSection::default(),
            degraded_fallback: true,
        }
    }
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
            suspect_after_secs: 15,
            dead_after_secs: 45,
            probe: ProbeSection::default(),
        }
    }
}

impl Default for ProbeSection {
    fn default() -> Self {
        let probe = ProbeConfig::default();
        Self {
            enabled: false,
            path: probe.path,
            timeout_ms: probe.timeout.as_millis() as u64,
        }
    }
}

impl Default for ForwardSection {
    fn default() -> Self {
        let timeout = TimeoutPolicy::default();
        Self {
            attempt_timeout_ms: timeout.attempt_timeout.as_millis() as u64,
            connect_timeout_ms: timeout.connect_timeout.as_millis() as u64,
            retry: true,
        }
    }
}

impl Default for ReferencesSection {
    fn default() -> Self {
        let policy = ReferencePolicy::default();
        Self {
            mode: policy.mode,
            vehicle_service: policy.vehicle_service,
            client_service: policy.client_service,
            client_prefix: policy.client_prefix,
        }
    }
}

impl GatewayConfig {
    /// Load from `$GATEWAY_CONFIG` (or the default path), apply environment
    /// overrides and validate
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading gateway config {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("parsing gateway config {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply `GATEWAY_LISTEN` and `GATEWAY_REFERENCE_MODE`
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = var("GATEWAY_LISTEN") {
            self.listen = listen;
        }
        if let Some(mode) = var("GATEWAY_REFERENCE_MODE") {
            self.references.mode = mode
                .parse()
                .map_err(|e: String| anyhow::anyhow!("GATEWAY_REFERENCE_MODE: {}", e))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if self.routes.is_empty() {
            bail!("at least one route must be configured");
        }
        self.routing_table()?;
        self.thresholds()?;
        if self.health.sweep_interval_secs == 0 {
            bail!("health.sweep_interval_secs must be positive");
        }
        if self.forward.attempt_timeout_ms == 0 {
            bail!("forward.attempt_timeout_ms must be positive");
        }
        if self.forward.connect_timeout_ms == 0 {
            bail!("forward.connect_timeout_ms must be positive");
        }
        if self.health.probe.enabled && self.health.probe.timeout_ms == 0 {
            bail!("health.probe.timeout_ms must be positive when the probe is enabled");
        }
        if self.health.probe.enabled && !self.health.probe.path.starts_with('/') {
            bail!("health.probe.path must start with '/'");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("invalid listen address {}", self.listen))
    }

    pub fn routing_table(&self) -> Result<RoutingTable> {
        Ok(RoutingTable::new(self.routes.clone())?)
    }

    pub fn thresholds(&self) -> Result<HealthThresholds> {
        Ok(HealthThresholds::new(
            Duration::from_secs(self.health.suspect_after_secs),
            Duration::from_secs(self.health.dead_after_secs),
        )?)
    }

    pub fn health_config(&self) -> Result<HealthCheckConfig> {
        let probe = self.health.probe.enabled.then(|| ProbeConfig {
            path: self.health.probe.path.clone(),
            timeout: Duration::from_millis(self.health.probe.timeout_ms),
        });
        Ok(HealthCheckConfig {
            sweep_interval: Duration::from_secs(self.health.sweep_interval_secs),
            thresholds: self.thresholds()?,
            probe,
        })
    }

    pub fn traffic_policy(&self) -> TrafficPolicy {
        TrafficPolicy {
            timeout: TimeoutPolicy {
                attempt_timeout: Duration::from_millis(self.forward.attempt_timeout_ms),
                connect_timeout: Duration::from_millis(self.forward.connect_timeout_ms),
            },
            retry: RetryPolicy {
                retry_on_failure: self.forward.retry,
            },
            degraded_fallback: self.degraded_fallback,
        }
    }

    pub fn reference_policy(&self) -> ReferencePolicy {
        ReferencePolicy {
            mode: self.references.mode,
            vehicle_service: self.references.vehicle_service.clone(),
            client_service: self.references.client_service.clone(),
            client_prefix: self.references.client_prefix.clone(),
        }
    }
}
