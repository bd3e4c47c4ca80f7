//! Round-robin selection across the instances of a service

use router_core::ServiceInstance;
use std::collections::HashMap;
use std::sync::Mutex;

/// Load balancer keeping one rotation cursor per logical service.
///
/// The cursor advances on every selection and wraps at the length of the
/// sequence it is applied to. The lock covers the cursor update only.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    cursors: Mutex<HashMap<String, usize>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the next instance for `service`
    pub fn select<'a>(
        &self,
        service: &str,
        instances: &'a [ServiceInstance],
    ) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }

        let current = self.advance(service);
        instances.get(current % instances.len())
    }

    /// Select the next instance in rotation order that is not `tried`.
    /// Returns None when `tried` is the only candidate.
    pub fn select_excluding<'a>(
        &self,
        service: &str,
        instances: &'a [ServiceInstance],
        tried: &str,
    ) -> Option<&'a ServiceInstance> {
        if !instances.iter().any(|i| i.instance_id != tried) {
            return None;
        }

        let current = self.advance(service);
        (0..instances.len())
            .map(|offset| &instances[(current + offset) % instances.len()])
            .find(|i| i.instance_id != tried)
    }

    fn advance(&self, service: &str) -> usize {
        let mut cursors = self.cursors.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let cursor = cursors.entry(service.to_string()).or_insert(0);
        let current = *cursor;
        *cursor = cursor.wrapping_add(1);
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use router_core::InstanceStatus;
    use std::collections::HashMap;
    use tokio::time::Instant;

    fn instances(n: u16) -> Vec<ServiceInstance> {
        (0..n)
            .map(|i| ServiceInstance {
                service_name: "client-service".to_string(),
                instance_id: format!("i{}", i),
                host: "127.0.0.1".to_string(),
                port: 8000 + i,
                status: InstanceStatus::Healthy,
                last_heartbeat: Instant::now(),
                registered_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_empty_selection() {
        let lb = LoadBalancer::new();
        assert!(lb.select("client-service", &[]).is_none());
    }

    #[test]
    fn test_round_robin_order() {
        let lb = LoadBalancer::new();
        let pool = instances(3);
        let picked: Vec<&str> = (0..6)
            .map(|_| lb.select("client-service", &pool).unwrap().instance_id.as_str())
            .collect();
        assert_eq!(picked, vec!["i0", "i1", "i2", "i0", "i1", "i2"]);
    }

    #[test]
    fn test_round_robin_fairness() {
        let pool = instances(3);
        for n in [1usize, 2, 3, 10, 31, 100] {
            let lb = LoadBalancer::new();
            let mut counts: HashMap<String, usize> = HashMap::new();
            for _ in 0..n {
                let chosen = lb.select("client-service", &pool).unwrap();
                *counts.entry(chosen.instance_id.clone()).or_default() += 1;
            }
            let (floor, ceil) = (n / 3, (n + 2) / 3);
            for instance in &pool {
                let count = counts.get(&instance.instance_id).copied().unwrap_or(0);
                assert!(count == floor || count == ceil, "n={} count={}", n, count);
            }
        }
    }

    #[test]
    fn test_cursors_are_per_service() {
        let lb = LoadBalancer::new();
        let pool = instances(2);
        assert_eq!(lb.select("a", &pool).unwrap().instance_id, "i0");
        assert_eq!(lb.select("b", &pool).unwrap().instance_id, "i0");
        assert_eq!(lb.select("a", &pool).unwrap().instance_id, "i1");
    }

    #[test]
    fn test_select_excluding_skips_tried() {
        let lb = LoadBalancer::new();
        let pool = instances(3);
        let first = lb.select("client-service", &pool).unwrap();
        let alternate = lb
            .select_excluding("client-service", &pool, &first.instance_id)
            .unwrap();
        assert_eq!(first.instance_id, "i0");
        assert_eq!(alternate.instance_id, "i1");
    }

    #[test]
    fn test_select_excluding_wraps_past_tried() {
        let lb = LoadBalancer::new();
        let pool = instances(2);
        // cursor lands on i1, which was the one tried
        lb.select("client-service", &pool);
        let alternate = lb.select_excluding("client-service", &pool, "i1").unwrap();
        assert_eq!(alternate.instance_id, "i0");
    }

    #[test]
    fn test_select_excluding_single_instance() {
        let lb = LoadBalancer::new();
        let pool = instances(1);
        assert!(lb.select_excluding("client-service", &pool, "i0").is_none());
    }
}
