//! Self-registration of resource service instances with the gateway registry
pub mod agent;
pub mod client;
pub mod local;

pub use agent::{AgentConfig, RegistrationAgent};
pub use client::RegistryClient;
pub use local::LocalRegistry;

use async_trait::async_trait;
use fleet_api::{InstanceView, RegisterInstance};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    /// The registry has no such instance; the caller must register again
    #[error("Instance not registered: {service}/{instance_id}")]
    NotFound { service: String, instance_id: String },

    #[error("Registration rejected: {0}")]
    Rejected(String),

    #[error("Registry unreachable: {0}")]
    Transport(String),

    #[error("Unexpected registry response: {0}")]
    UnexpectedStatus(u16),
}

/// Operations an instance performs against the registry
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn register(&self, registration: &RegisterInstance) -> Result<InstanceView>;

    async fn heartbeat(&self, service_name: &str, instance_id: &str) -> Result<InstanceView>;

    /// Remove the instance. Absent instances are not an error.
    async fn deregister(&self, service_name: &str, instance_id: &str) -> Result<()>;
}
