//! Service registry for self-registered instances

use crate::{CoreError, InstanceStatus, Result, ServiceInstance};
use chrono::Utc;
use fleet_api::RegisterInstance;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// ServiceRegistry is the process-wide catalog of live instances, keyed by
/// logical service name and then instance id.
///
/// Every operation takes the lock for the map mutation only, so callers
/// never hold it across network I/O. Instances of a service are kept in
/// instance-id order, which gives selection a stable sequence.
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<String, BTreeMap<String, ServiceInstance>>>>,
}

/// Heartbeat age limits used by the health sweep
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HealthThresholds {
    /// Age after which a Healthy instance becomes Suspect
    pub suspect_after: Duration,
    /// Age after which an instance is evicted
    pub dead_after: Duration,
}

impl HealthThresholds {
    pub fn new(suspect_after: Duration, dead_after: Duration) -> Result<Self> {
        if suspect_after.is_zero() || suspect_after >= dead_after {
            return Err(CoreError::InvalidConfiguration(format!(
                "suspect threshold ({:?}) must be non-zero and shorter than dead threshold ({:?})",
                suspect_after, dead_after
            )));
        }
        Ok(Self {
            suspect_after,
            dead_after,
        })
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            suspect_after: Duration::from_secs(15),
            dead_after: Duration::from_secs(45),
        }
    }
}

/// Instances a request may be sent to
#[derive(Clone, Debug, Default)]
pub struct Selection {
    pub instances: Vec<ServiceInstance>,
    /// True when no instance was Healthy and Suspect ones were returned instead
    pub degraded: bool,
}

/// Outcome of one health sweep
#[derive(Clone, Debug, Default)]
pub struct SweepReport {
    /// (service, instance id) demoted from Healthy to Suspect
    pub suspected: Vec<(String, String)>,
    /// Instances removed from the registry, reported with status Dead
    pub evicted: Vec<ServiceInstance>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register or replace an instance. The entry becomes Healthy with a
    /// fresh heartbeat. A different instance of the same service holding
    /// the same address is superseded and removed.
    pub async fn register(&self, registration: RegisterInstance) -> Result<ServiceInstance> {
        let RegisterInstance {
            service_name,
            instance_id,
            host,
            port,
        } = registration;

        if service_name.trim().is_empty() {
            return Err(CoreError::InvalidRegistration("service name is empty".to_string()));
        }
        if host.trim().is_empty() || port == 0 {
            return Err(CoreError::InvalidRegistration(format!(
                "invalid address {}:{}",
                host, port
            )));
        }

        let instance_id = instance_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut services = self.services.write().await;
        let instances = services.entry(service_name.clone()).or_default();

        let superseded: Vec<String> = instances
            .values()
            .filter(|i| i.instance_id != instance_id && i.same_address(&host, port))
            .map(|i| i.instance_id.clone())
            .collect();
        for old_id in superseded {
            instances.remove(&old_id);
            info!(
                service = %service_name,
                instance = %old_id,
                replaced_by = %instance_id,
                "Superseded instance registered on the same address"
            );
        }

        let registered_at = instances
            .get(&instance_id)
            .map(|existing| existing.registered_at)
            .unwrap_or_else(Utc::now);

        let instance = ServiceInstance {
            service_name: service_name.clone(),
            instance_id: instance_id.clone(),
            host,
            port,
            status: InstanceStatus::Healthy,
            last_heartbeat: Instant::now(),
            registered_at,
        };
        instances.insert(instance_id.clone(), instance.clone());

        debug!(
            service = %service_name,
            instance = %instance_id,
            address = %instance.address(),
            "Registered instance"
        );
        Ok(instance)
    }

    /// Refresh an instance's heartbeat, restoring Healthy if it was Suspect.
    /// Unknown instances must re-register.
    pub async fn heartbeat(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> Result<ServiceInstance> {
        let mut services = self.services.write().await;
        let instance = services
            .get_mut(service_name)
            .and_then(|instances| instances.get_mut(instance_id))
            .ok_or_else(|| CoreError::instance_not_found(service_name, instance_id))?;

        instance.last_heartbeat = Instant::now();
        if instance.status == InstanceStatus::Suspect {
            instance.status = InstanceStatus::Healthy;
            info!(service = %service_name, instance = %instance_id, "Instance recovered");
        }
        Ok(instance.clone())
    }

    /// Healthy instances of a service, in instance-id order
    pub async fn list_healthy(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.list_with_status(service_name, InstanceStatus::Healthy).await
    }

    /// Healthy instances, or the Suspect ones when nothing is Healthy and
    /// `allow_degraded` is set
    pub async fn list_selectable(&self, service_name: &str, allow_degraded: bool) -> Selection {
        let services = self.services.read().await;
        let Some(instances) = services.get(service_name) else {
            return Selection::default();
        };

        let healthy = Self::filter_status(instances, InstanceStatus::Healthy);
        if !healthy.is_empty() || !allow_degraded {
            return Selection {
                instances: healthy,
                degraded: false,
            };
        }

        let suspect = Self::filter_status(instances, InstanceStatus::Suspect);
        let degraded = !suspect.is_empty();
        Selection {
            instances: suspect,
            degraded,
        }
    }

    /// Every entry of a service regardless of status
    pub async fn list_instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        let services = self.services.read().await;
        services
            .get(service_name)
            .map(|instances| instances.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of services with at least one entry
    pub async fn services(&self) -> Vec<String> {
        let services = self.services.read().await;
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove an instance. Returns whether it was present.
    pub async fn deregister(&self, service_name: &str, instance_id: &str) -> bool {
        let mut services = self.services.write().await;
        let removed = match services.get_mut(service_name) {
            Some(instances) => {
                let removed = instances.remove(instance_id).is_some();
                if instances.is_empty() {
                    services.remove(service_name);
                }
                removed
            }
            None => false,
        };

        if removed {
            debug!(service = %service_name, instance = %instance_id, "Deregistered instance");
        }
        removed
    }

    /// Demote a Healthy instance to Suspect. Only a heartbeat promotes it back.
    pub async fn mark_suspect(&self, service_name: &str, instance_id: &str) -> Result<()> {
        let mut services = self.services.write().await;
        let instance = services
            .get_mut(service_name)
            .and_then(|instances| instances.get_mut(instance_id))
            .ok_or_else(|| CoreError::instance_not_found(service_name, instance_id))?;

        if instance.status == InstanceStatus::Healthy {
            instance.status = InstanceStatus::Suspect;
            warn!(service = %service_name, instance = %instance_id, "Instance marked suspect");
        }
        Ok(())
    }

    /// Apply the heartbeat thresholds to every entry in one pass.
    ///
    /// `now` is taken by the caller before the lock is acquired: a register
    /// or heartbeat that lands after it carries a later timestamp and is
    /// never evicted by this sweep.
    pub async fn sweep(&self, now: Instant, thresholds: &HealthThresholds) -> SweepReport {
        let mut report = SweepReport::default();
        let mut services = self.services.write().await;

        for (service_name, instances) in services.iter_mut() {
            let mut dead = Vec::new();
            for instance in instances.values_mut() {
                let age = now.saturating_duration_since(instance.last_heartbeat);
                if age > thresholds.dead_after {
                    dead.push(instance.instance_id.clone());
                } else if age > thresholds.suspect_after
                    && instance.status == InstanceStatus::Healthy
                {
                    instance.status = InstanceStatus::Suspect;
                    report
                        .suspected
                        .push((service_name.clone(), instance.instance_id.clone()));
                }
            }

            for instance_id in dead {
                if let Some(mut instance) = instances.remove(&instance_id) {
                    instance.status = InstanceStatus::Dead;
                    report.evicted.push(instance);
                }
            }
        }
        services.retain(|_, instances| !instances.is_empty());

        report
    }

    /// Healthy and Suspect counts per service
    pub async fn status_counts(&self) -> Vec<(String, InstanceStatus, usize)> {
        let services = self.services.read().await;
        let mut counts = Vec::with_capacity(services.len() * 2);
        for (service_name, instances) in services.iter() {
            for status in [InstanceStatus::Healthy, InstanceStatus::Suspect] {
                let count = instances.values().filter(|i| i.status == status).count();
                counts.push((service_name.clone(), status, count));
            }
        }
        counts
    }

    /// Total number of registered instances
    pub async fn instance_count(&self) -> usize {
        let services = self.services.read().await;
        services.values().map(|instances| instances.len()).sum()
    }

    async fn list_with_status(
        &self,
        service_name: &str,
        status: InstanceStatus,
    ) -> Vec<ServiceInstance> {
        let services = self.services.read().await;
        services
            .get(service_name)
            .map(|instances| Self::filter_status(instances, status))
            .unwrap_or_default()
    }

    fn filter_status(
        instances: &BTreeMap<String, ServiceInstance>,
        status: InstanceStatus,
    ) -> Vec<ServiceInstance> {
        instances
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(service: &str, id: &str, port: u16) -> RegisterInstance {
        RegisterInstance {
            service_name: service.to_string(),
            instance_id: Some(id.to_string()),
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    fn ids(instances: &[ServiceInstance]) -> Vec<&str> {
        instances.iter().map(|i| i.instance_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = ServiceRegistry::new();
        registry.register(registration("client-service", "b", 8002)).await.unwrap();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();

        let healthy = registry.list_healthy("client-service").await;
        assert_eq!(ids(&healthy), vec!["a", "b"]);
        assert!(healthy.iter().all(|i| i.status == InstanceStatus::Healthy));
        assert!(registry.list_healthy("vehicle-service").await.is_empty());
    }

    #[tokio::test]
    async fn test_register_generates_id() {
        let registry = ServiceRegistry::new();
        let mut reg = registration("client-service", "", 8001);
        reg.instance_id = None;
        let instance = registry.register(reg).await.unwrap();
        assert!(!instance.instance_id.is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_bad_address() {
        let registry = ServiceRegistry::new();
        let result = registry.register(registration("client-service", "a", 0)).await;
        assert!(matches!(result, Err(CoreError::InvalidRegistration(_))));
        let result = registry.register(registration(" ", "a", 8001)).await;
        assert!(matches!(result, Err(CoreError::InvalidRegistration(_))));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = ServiceRegistry::new();
        let first = registry.register(registration("client-service", "a", 8001)).await.unwrap();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();

        let all = registry.list_instances("client-service").await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].address(), first.address());
        assert_eq!(all[0].registered_at, first.registered_at);
        assert_eq!(all[0].status, InstanceStatus::Healthy);
        assert_eq!(registry.instance_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_address_supersedes_previous_instance() {
        let registry = ServiceRegistry::new();
        registry.register(registration("client-service", "old", 8001)).await.unwrap();
        registry.register(registration("client-service", "new", 8001)).await.unwrap();

        let all = registry.list_instances("client-service").await;
        assert_eq!(ids(&all), vec!["new"]);
    }

    #[tokio::test]
    async fn test_same_address_across_services_is_allowed() {
        let registry = ServiceRegistry::new();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();
        registry.register(registration("vehicle-service", "b", 8001)).await.unwrap();
        assert_eq!(registry.instance_count().await, 2);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_instance() {
        let registry = ServiceRegistry::new();
        let err = registry.heartbeat("client-service", "ghost").await.unwrap_err();
        assert_eq!(
            err,
            CoreError::InstanceNotFound {
                service: "client-service".to_string(),
                instance_id: "ghost".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_deregister_is_noop_when_absent() {
        let registry = ServiceRegistry::new();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();
        assert!(registry.deregister("client-service", "a").await);
        assert!(!registry.deregister("client-service", "a").await);
        assert!(!registry.deregister("unknown", "a").await);
        assert!(registry.services().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_suspects_then_evicts() {
        let registry = ServiceRegistry::new();
        let thresholds =
            HealthThresholds::new(Duration::from_secs(10), Duration::from_secs(30)).unwrap();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let report = registry.sweep(Instant::now(), &thresholds).await;
        assert_eq!(report.suspected, vec![("client-service".to_string(), "a".to_string())]);
        assert!(registry.list_healthy("client-service").await.is_empty());
        assert_eq!(
            registry.list_instances("client-service").await[0].status,
            InstanceStatus::Suspect
        );

        tokio::time::advance(Duration::from_secs(20)).await;
        let report = registry.sweep(Instant::now(), &thresholds).await;
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.evicted[0].status, InstanceStatus::Dead);
        assert!(registry.list_instances("client-service").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_restores_suspect() {
        let registry = ServiceRegistry::new();
        let thresholds =
            HealthThresholds::new(Duration::from_secs(10), Duration::from_secs(30)).unwrap();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();

        tokio::time::advance(Duration::from_secs(15)).await;
        registry.sweep(Instant::now(), &thresholds).await;
        assert!(registry.list_healthy("client-service").await.is_empty());

        let instance = registry.heartbeat("client-service", "a").await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Healthy);
        assert_eq!(registry.list_healthy("client-service").await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_after_sweep_timestamp_survives() {
        let registry = ServiceRegistry::new();
        let thresholds =
            HealthThresholds::new(Duration::from_secs(10), Duration::from_secs(30)).unwrap();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        let sweep_started = Instant::now();
        tokio::time::advance(Duration::from_millis(1)).await;
        // Re-registration lands after the sweep read the clock
        registry.register(registration("client-service", "a", 8001)).await.unwrap();

        let report = registry.sweep(sweep_started, &thresholds).await;
        assert!(report.evicted.is_empty());
        assert_eq!(registry.list_healthy("client-service").await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_healthy_never_returns_dead_or_suspect() {
        let registry = ServiceRegistry::new();
        let thresholds =
            HealthThresholds::new(Duration::from_secs(4), Duration::from_secs(9)).unwrap();

        // Scripted interleaving of registrations, heartbeats and sweeps
        for step in 0..60u16 {
            let id = format!("i{}", step % 5);
            match step % 7 {
                0 | 3 => {
                    registry
                        .register(registration("svc", &id, 9000 + (step % 5)))
                        .await
                        .unwrap();
                }
                1 | 5 => {
                    let _ = registry.heartbeat("svc", &id).await;
                }
                2 => {
                    registry.deregister("svc", &id).await;
                }
                _ => {
                    let report = registry.sweep(Instant::now(), &thresholds).await;
                    assert!(report.evicted.iter().all(|i| i.status == InstanceStatus::Dead));
                }
            }
            tokio::time::advance(Duration::from_secs(1 + u64::from(step % 3))).await;

            let present = registry.list_instances("svc").await;
            for instance in registry.list_healthy("svc").await {
                assert_eq!(instance.status, InstanceStatus::Healthy);
                assert!(present.iter().any(|p| p.instance_id == instance.instance_id));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_selectable_falls_back_to_suspect() {
        let registry = ServiceRegistry::new();
        let thresholds =
            HealthThresholds::new(Duration::from_secs(10), Duration::from_secs(30)).unwrap();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        registry.sweep(Instant::now(), &thresholds).await;

        let selection = registry.list_selectable("client-service", true).await;
        assert!(selection.degraded);
        assert_eq!(ids(&selection.instances), vec!["a"]);

        let strict = registry.list_selectable("client-service", false).await;
        assert!(strict.instances.is_empty());
        assert!(!strict.degraded);

        registry.register(registration("client-service", "b", 8002)).await.unwrap();
        let selection = registry.list_selectable("client-service", true).await;
        assert!(!selection.degraded);
        assert_eq!(ids(&selection.instances), vec!["b"]);
    }

    #[tokio::test]
    async fn test_mark_suspect() {
        let registry = ServiceRegistry::new();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();
        registry.mark_suspect("client-service", "a").await.unwrap();
        assert!(registry.list_healthy("client-service").await.is_empty());
        assert!(registry.mark_suspect("client-service", "zzz").await.is_err());
    }

    #[tokio::test]
    async fn test_status_counts() {
        let registry = ServiceRegistry::new();
        registry.register(registration("client-service", "a", 8001)).await.unwrap();
        registry.register(registration("client-service", "b", 8002)).await.unwrap();
        registry.mark_suspect("client-service", "b").await.unwrap();

        let counts = registry.status_counts().await;
        assert!(counts.contains(&("client-service".to_string(), InstanceStatus::Healthy, 1)));
        assert!(counts.contains(&("client-service".to_string(), InstanceStatus::Suspect, 1)));
    }

    #[tokio::test]
    async fn test_concurrent_registrations_are_not_lost() {
        let registry = Arc::new(ServiceRegistry::new());
        let tasks = (0..64u16).map(|n| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .register(registration("vehicle-service", &format!("v{:02}", n), 10_000 + n))
                    .await
            })
        });

        for result in futures::future::join_all(tasks).await {
            assert!(result.unwrap().is_ok());
        }
        assert_eq!(registry.list_healthy("vehicle-service").await.len(), 64);
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(HealthThresholds::new(Duration::from_secs(30), Duration::from_secs(10)).is_err());
        assert!(HealthThresholds::new(Duration::from_secs(10), Duration::from_secs(10)).is_err());
        assert!(HealthThresholds::new(Duration::ZERO, Duration::from_secs(10)).is_err());
        assert!(HealthThresholds::new(Duration::from_secs(5), Duration::from_secs(15)).is_ok());
    }
}
