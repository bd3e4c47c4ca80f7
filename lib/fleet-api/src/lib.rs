//! Fleet API types shared by the gateway and the resource services
//!
//! This library defines:
//! - Client and Vehicle resources, with their required-field validation
//! - The registration wire format spoken between instances and the registry
//! - ClientId, the weak link from a vehicle to its client

pub mod error;
pub mod registry;
pub mod resources;

pub use error::ValidationError;
pub use registry::{InstanceStatus, InstanceView, RegisterInstance};
pub use resources::{Client, ClientId, Resource, Vehicle};

/// Collection path of the client resource
pub const CLIENTS_PATH: &str = "/api/clients";
/// Collection path of the vehicle resource
pub const VEHICLES_PATH: &str = "/api/vehicles";
