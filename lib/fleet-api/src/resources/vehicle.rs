use super::{require, ClientId, Resource};
use crate::ValidationError;
use serde::{Deserialize, Serialize};

/// A vehicle record. `client_id` is a weak reference into the client
/// service: nothing guarantees the client exists, now or later.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    /// Assigned by the vehicle service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(default)]
    pub make: String,

    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Registration plate, natural key
    #[serde(default)]
    pub plate: String,

    #[serde(default)]
    pub price: Option<f64>,

    #[serde(default)]
    pub client_id: Option<ClientId>,
}

impl Resource for Vehicle {
    const KIND: &'static str = "vehicle";

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }

    fn natural_key(&self) -> &str {
        &self.plate
    }

    fn client_reference(&self) -> Option<ClientId> {
        self.client_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require("make", &self.make)?;
        require("model", &self.model)?;
        require("plate", &self.plate)?;
        match self.price {
            None => Err(ValidationError::MissingField("price")),
            Some(price) if !price.is_finite() || price < 0.0 => Err(ValidationError::InvalidField {
                field: "price",
                reason: format!("{} is not a valid price", price),
            }),
            Some(_) => Ok(()),
        }
    }
}
