/// Resources owned by the fleet resource services

pub mod client;
pub mod vehicle;

pub use client::Client;
pub use vehicle::Vehicle;

use crate::ValidationError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Identifier of a client record, as stored in a vehicle's client reference
pub type ClientId = u64;

/// A record a resource service stores and serves over the CRUD contract
pub trait Resource: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Singular name used in logs and error messages
    const KIND: &'static str;

    fn id(&self) -> Option<u64>;

    fn set_id(&mut self, id: u64);

    /// Value that must be unique across the collection
    fn natural_key(&self) -> &str;

    /// Check required fields before the record is stored
    fn validate(&self) -> Result<(), ValidationError>;

    /// Client this record points at, for resources that carry one
    fn client_reference(&self) -> Option<ClientId> {
        None
    }
}

pub(crate) fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}
