use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Instance not found: {service}/{instance_id}")]
    InstanceNotFound { service: String, instance_id: String },

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("No route for path: {0}")]
    NoRoute(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl CoreError {
    pub(crate) fn instance_not_found(service: &str, instance_id: &str) -> Self {
        CoreError::InstanceNotFound {
            service: service.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}
