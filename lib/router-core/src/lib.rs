//! Core discovery and routing functionality
//!
//! This library provides:
//! - Service registry of self-registered instances and their liveness
//! - Static routing table from path prefix to logical service name

pub mod registry;
pub mod instance;
pub mod routing;
pub mod error;

pub use registry::{HealthThresholds, Selection, ServiceRegistry, SweepReport};
pub use instance::ServiceInstance;
pub use routing::{RouteRule, RoutingTable};
pub use error::{CoreError, Result};
pub use fleet_api::InstanceStatus;
