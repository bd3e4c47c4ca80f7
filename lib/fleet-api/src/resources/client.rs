use super::{require, Resource};
use crate::ValidationError;
use serde::{Deserialize, Serialize};

/// A customer of the fleet
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// Assigned by the client service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(default)]
    pub last_name: String,

    #[serde(default)]
    pub first_name: String,

    /// Natural key
    #[serde(default)]
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Resource for Client {
    const KIND: &'static str = "client";

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }

    fn natural_key(&self) -> &str {
        &self.email
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require("lastName", &self.last_name)?;
        require("firstName", &self.first_name)?;
        require("email", &self.email)?;
        if !self.email.contains('@') {
            return Err(ValidationError::InvalidField {
                field: "email",
                reason: "must contain '@'".to_string(),
            });
        }
        Ok(())
    }
}
