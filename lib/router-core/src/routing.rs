//! Static routing table from URL path prefix to logical service name

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Maps every path under `prefix` to the logical service `service`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    pub service: String,
}

impl RouteRule {
    pub fn new(prefix: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            service: service.into(),
        }
    }

    /// Prefixes match whole path segments: `/api/clients` matches
    /// `/api/clients` and `/api/clients/7` but not `/api/clientsx`.
    pub fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return path.starts_with('/');
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Immutable set of route rules, resolved by longest prefix
#[derive(Clone, Debug)]
pub struct RoutingTable {
    // Longest prefix first
    rules: Vec<RouteRule>,
}

impl RoutingTable {
    /// Validate and load the rules. Prefixes are normalized (leading `/`
    /// required, trailing `/` dropped); duplicates are rejected.
    pub fn new(rules: Vec<RouteRule>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(rules.len());

        for rule in rules {
            if rule.service.trim().is_empty() {
                return Err(CoreError::InvalidConfiguration(format!(
                    "route {} has no service",
                    rule.prefix
                )));
            }
            if !rule.prefix.starts_with('/') {
                return Err(CoreError::InvalidConfiguration(format!(
                    "route prefix must start with '/': {}",
                    rule.prefix
                )));
            }

            let trimmed = rule.prefix.trim_end_matches('/');
            let prefix = if trimmed.is_empty() { "/" } else { trimmed }.to_string();

            if !seen.insert(prefix.clone()) {
                return Err(CoreError::InvalidConfiguration(format!(
                    "duplicate route prefix: {}",
                    prefix
                )));
            }
            normalized.push(RouteRule::new(prefix, rule.service));
        }

        normalized.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { rules: normalized })
    }

    /// Logical service for a request path, by longest matching prefix
    pub fn resolve(&self, path: &str) -> Result<&RouteRule> {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.matches(path))
            .ok_or_else(|| CoreError::NoRoute(path.to_string()))?;

        debug!("Resolved {} to {} via {}", path, rule.service, rule.prefix);
        Ok(rule)
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RoutingTable {
        RoutingTable::new(vec![
            RouteRule::new("/api/clients", "client-service"),
            RouteRule::new("/api/clients/health", "health-service"),
            RouteRule::new("/api/vehicles/", "vehicle-service"),
        ])
        .unwrap()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = table();
        assert_eq!(table.resolve("/api/clients/health").unwrap().service, "health-service");
        assert_eq!(table.resolve("/api/clients/health/deep").unwrap().service, "health-service");
        assert_eq!(table.resolve("/api/clients/12").unwrap().service, "client-service");
        assert_eq!(table.resolve("/api/clients").unwrap().service, "client-service");
    }

    #[test]
    fn test_segment_boundary() {
        let table = table();
        assert!(matches!(table.resolve("/api/clientsx"), Err(CoreError::NoRoute(_))));
        assert!(matches!(
            table.resolve("/api/clients/healthz"),
            Ok(rule) if rule.service == "client-service"
        ));
    }

    #[test]
    fn test_trailing_slash_normalized() {
        let table = table();
        assert_eq!(table.resolve("/api/vehicles").unwrap().service, "vehicle-service");
        assert_eq!(table.resolve("/api/vehicles/client/3").unwrap().service, "vehicle-service");
    }

    #[test]
    fn test_no_route() {
        let table = table();
        assert_eq!(
            table.resolve("/metrics").unwrap_err(),
            CoreError::NoRoute("/metrics".to_string())
        );
    }

    #[test]
    fn test_root_prefix_is_fallback() {
        let table = RoutingTable::new(vec![
            RouteRule::new("/", "default-service"),
            RouteRule::new("/api/clients", "client-service"),
        ])
        .unwrap();
        assert_eq!(table.resolve("/anything").unwrap().service, "default-service");
        assert_eq!(table.resolve("/api/clients/1").unwrap().service, "client-service");
    }

    #[test]
    fn test_duplicate_prefix_rejected() {
        let result = RoutingTable::new(vec![
            RouteRule::new("/api/clients", "a"),
            RouteRule::new("/api/clients/", "b"),
        ]);
        assert!(matches!(result, Err(CoreError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        assert!(RoutingTable::new(vec![RouteRule::new("api", "a")]).is_err());
        assert!(RoutingTable::new(vec![RouteRule::new("/api", " ")]).is_err());
    }
}
