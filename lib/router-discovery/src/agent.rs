//! Background registration and heartbeat loop for one instance

use fleet_api::RegisterInstance;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{DiscoveryError, RegistryApi, Result};

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub registration: RegisterInstance,
    /// Nominal time between heartbeats
    pub heartbeat_interval: Duration,
    /// Each wait is the interval shifted by a random offset within ±jitter
    pub jitter: Duration,
}

impl AgentConfig {
    pub fn new(registration: RegisterInstance, heartbeat_interval: Duration) -> Self {
        Self {
            registration,
            heartbeat_interval,
            jitter: heartbeat_interval / 5,
        }
    }

    /// Wait before the next heartbeat
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.min(self.heartbeat_interval).as_millis() as u64;
        if jitter_ms == 0 {
            return self.heartbeat_interval;
        }
        let offset = rand::thread_rng().gen_range(0..=2 * jitter_ms);
        (self.heartbeat_interval + Duration::from_millis(offset))
            .saturating_sub(Duration::from_millis(jitter_ms))
    }
}

/// RegistrationAgent keeps one instance registered until shut down.
///
/// The instance id is fixed up front, so re-registering after the registry
/// forgot the instance restores the same identity.
pub struct RegistrationAgent {
    api: Arc<dyn RegistryApi>,
    service_name: String,
    instance_id: String,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RegistrationAgent {
    /// Register and start heartbeating. A rejected registration is returned
    /// as an error; an unreachable registry is retried from the loop.
    pub async fn start(api: Arc<dyn RegistryApi>, mut config: AgentConfig) -> Result<Self> {
        let instance_id = config
            .registration
            .instance_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        config.registration.instance_id = Some(instance_id.clone());
        let service_name = config.registration.service_name.clone();

        let registered = match api.register(&config.registration).await {
            Ok(view) => {
                info!(
                    service = %view.service_name,
                    instance = %view.instance_id,
                    "Registered {}:{}",
                    view.host,
                    view.port
                );
                true
            }
            Err(e @ DiscoveryError::Rejected(_)) => return Err(e),
            Err(e) => {
                warn!("Initial registration failed, will retry: {}", e);
                false
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(heartbeat_loop(api.clone(), config, registered, shutdown_rx));

        Ok(Self {
            api,
            service_name,
            instance_id,
            shutdown,
            handle,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Stop heartbeating, then deregister
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Heartbeat task ended abnormally: {}", e);
        }
        self.api.deregister(&self.service_name, &self.instance_id).await?;
        info!(service = %self.service_name, instance = %self.instance_id, "Deregistered");
        Ok(())
    }
}

async fn heartbeat_loop(
    api: Arc<dyn RegistryApi>,
    config: AgentConfig,
    mut registered: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let service_name = config.registration.service_name.clone();
    let instance_id = config.registration.instance_id.clone().unwrap_or_default();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.next_delay()) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Heartbeat loop stopped");
                    return;
                }
                continue;
            }
        }

        if !registered {
            registered = register(api.as_ref(), &config.registration).await;
            continue;
        }

        match api.heartbeat(&service_name, &instance_id).await {
            Ok(_) => debug!(service = %service_name, instance = %instance_id, "Heartbeat sent"),
            Err(DiscoveryError::NotFound { .. }) => {
                warn!(
                    service = %service_name,
                    instance = %instance_id,
                    "Registry forgot instance, re-registering"
                );
                registered = register(api.as_ref(), &config.registration).await;
            }
            Err(e) => warn!(
                service = %service_name,
                instance = %instance_id,
                "Heartbeat failed: {}",
                e
            ),
        }
    }
}

async fn register(api: &dyn RegistryApi, registration: &RegisterInstance) -> bool {
    match api.register(registration).await {
        Ok(view) => {
            info!(service = %view.service_name, instance = %view.instance_id, "Registered");
            true
        }
        Err(e) => {
            warn!("Registration failed: {}", e);
            false
        }
    }
}
