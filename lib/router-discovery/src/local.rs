//! In-process registry access, for a registry living in the same process

use async_trait::async_trait;
use fleet_api::{InstanceView, RegisterInstance};
use router_core::{CoreError, ServiceRegistry};
use std::sync::Arc;
use tokio::time::Instant;

use crate::{DiscoveryError, RegistryApi, Result};

/// LocalRegistry calls a ServiceRegistry directly
#[derive(Clone)]
pub struct LocalRegistry {
    registry: Arc<ServiceRegistry>,
}

impl LocalRegistry {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }
}

impl From<CoreError> for DiscoveryError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::InstanceNotFound { service, instance_id } => {
                DiscoveryError::NotFound { service, instance_id }
            }
            other => DiscoveryError::Rejected(other.to_string()),
        }
    }
}

#[async_trait]
impl RegistryApi for LocalRegistry {
    async fn register(&self, registration: &RegisterInstance) -> Result<InstanceView> {
        let instance = self.registry.register(registration.clone()).await?;
        Ok(instance.view(Instant::now()))
    }

    async fn heartbeat(&self, service_name: &str, instance_id: &str) -> Result<InstanceView> {
        let instance = self.registry.heartbeat(service_name, instance_id).await?;
        Ok(instance.view(Instant::now()))
    }

    async fn deregister(&self, service_name: &str, instance_id: &str) -> Result<()> {
        self.registry.deregister(service_name, instance_id).await;
        Ok(())
    }
}
