//! Health monitoring for registered instances

use futures::future::join_all;
use router_core::{HealthThresholds, ServiceInstance, ServiceRegistry, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;

/// Active probe settings
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeConfig {
    /// HTTP path to check for health
    pub path: String,
    /// Timeout for a single probe
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            timeout: Duration::from_secs(1),
        }
    }
}

/// Health monitor configuration
#[derive(Clone, Debug, PartialEq)]
pub struct HealthCheckConfig {
    /// Interval between sweeps
    pub sweep_interval: Duration,
    pub thresholds: HealthThresholds,
    /// Probe Healthy instances after each sweep; disabled when None
    pub probe: Option<ProbeConfig>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            thresholds: HealthThresholds::default(),
            probe: None,
        }
    }
}

/// Issues `GET {path}` against an instance
pub struct HealthChecker {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl HealthChecker {
    pub fn new(config: ProbeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build probe client with timeout, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self { client, config }
    }

    pub fn probe_url(&self, instance: &ServiceInstance) -> String {
        format!("{}{}", instance.base_url(), self.config.path)
    }

    /// Check if an instance answers its health endpoint with a 2xx
    pub async fn check_instance(&self, instance: &ServiceInstance) -> bool {
        let url = self.probe_url(instance);

        match time::timeout(self.config.timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => {
                debug!("Instance {} is healthy", instance.address());
                true
            }
            Ok(Ok(response)) => {
                warn!(
                    "Instance {} health check returned {}",
                    instance.address(),
                    response.status()
                );
                false
            }
            Ok(Err(e)) => {
                warn!("Instance {} health check error: {}", instance.address(), e);
                false
            }
            Err(_) => {
                warn!("Instance {} health check timeout", instance.address());
                false
            }
        }
    }
}

/// Periodically applies heartbeat thresholds to the registry and, when
/// configured, probes the instances that are still Healthy
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    config: HealthCheckConfig,
    checker: Option<HealthChecker>,
    metrics: Option<MetricsCollector>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, config: HealthCheckConfig) -> Self {
        let checker = config.probe.clone().map(HealthChecker::new);
        Self {
            registry,
            config,
            checker,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// One sweep, followed by the probe pass and a gauge refresh
    pub async fn run_once(&self) -> SweepReport {
        let now = Instant::now();
        let report = self.registry.sweep(now, &self.config.thresholds).await;

        for (service, instance_id) in &report.suspected {
            warn!(
                service = %service,
                instance = %instance_id,
                "Heartbeat overdue, instance suspect"
            );
        }
        for instance in &report.evicted {
            info!(
                service = %instance.service_name,
                instance = %instance.instance_id,
                address = %instance.address(),
                "Evicted dead instance"
            );
        }

        if let Some(checker) = &self.checker {
            self.probe_healthy(checker).await;
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_instance_counts(&self.registry.status_counts().await);
        }

        report
    }

    async fn probe_healthy(&self, checker: &HealthChecker) {
        let mut targets = Vec::new();
        for service in self.registry.services().await {
            targets.extend(self.registry.list_healthy(&service).await);
        }
        if targets.is_empty() {
            return;
        }

        let results =
            join_all(targets.iter().map(|instance| checker.check_instance(instance))).await;
        for (instance, healthy) in targets.iter().zip(results) {
            if healthy {
                continue;
            }
            // the instance may have been deregistered while the probe ran
            if let Err(e) = self
                .registry
                .mark_suspect(&instance.service_name, &instance.instance_id)
                .await
            {
                debug!("Skipped demotion after failed probe: {}", e);
            }
        }
    }

    /// Run sweeps on a fixed interval until `shutdown` flips to true
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "Health monitor started: interval {:?}, suspect after {:?}, dead after {:?}",
                self.config.sweep_interval,
                self.config.thresholds.suspect_after,
                self.config.thresholds.dead_after
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Health monitor stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
