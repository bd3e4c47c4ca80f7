//! In-memory record store with natural-key uniqueness

use fleet_api::{Resource, ValidationError};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("A {kind} with key {key} already exists")]
    Conflict { kind: &'static str, key: String },

    #[error("No {kind} with id {id}")]
    NotFound { kind: &'static str, id: u64 },
}

pub type Result<T> = std::result::Result<T, StoreError>;

struct Records<T> {
    next_id: u64,
    items: BTreeMap<u64, T>,
}

/// Store keeps records of one kind under monotonically assigned ids.
/// Ids are never reused, even after a delete.
pub struct Store<T: Resource> {
    records: RwLock<Records<T>>,
}

impl<T: Resource> Store<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records {
                next_id: 1,
                items: BTreeMap::new(),
            }),
        }
    }

    /// All records in id order
    pub async fn list(&self) -> Vec<T> {
        self.records.read().await.items.values().cloned().collect()
    }

    pub async fn get(&self, id: u64) -> Option<T> {
        self.records.read().await.items.get(&id).cloned()
    }

    /// Records matching `predicate`, in id order
    pub async fn filter<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.records
            .read()
            .await
            .items
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect()
    }

    /// Validate and store a new record. Any id in the input is replaced.
    pub async fn create(&self, mut record: T) -> Result<T> {
        record.validate()?;
        let mut records = self.records.write().await;
        Self::check_unique(&records.items, &record, None)?;

        let id = records.next_id;
        records.next_id += 1;
        record.set_id(id);
        records.items.insert(id, record.clone());

        debug!("Created {} {}", T::KIND, id);
        Ok(record)
    }

    /// Replace the record at `id`. The stored id is always the path id.
    pub async fn update(&self, id: u64, mut record: T) -> Result<T> {
        record.validate()?;
        let mut records = self.records.write().await;
        if !records.items.contains_key(&id) {
            return Err(StoreError::NotFound { kind: T::KIND, id });
        }
        Self::check_unique(&records.items, &record, Some(id))?;

        record.set_id(id);
        records.items.insert(id, record.clone());
        debug!("Updated {} {}", T::KIND, id);
        Ok(record)
    }

    /// Remove a record. Nothing that refers to it is touched.
    pub async fn delete(&self, id: u64) -> Result<T> {
        let removed = self.records.write().await.items.remove(&id);
        removed.ok_or(StoreError::NotFound { kind: T::KIND, id })
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.items.len()
    }

    fn check_unique(items: &BTreeMap<u64, T>, record: &T, except: Option<u64>) -> Result<()> {
        let key = record.natural_key().trim();
        let taken = items
            .iter()
            .any(|(id, existing)| {
                Some(*id) != except && existing.natural_key().trim().eq_ignore_ascii_case(key)
            });
        if taken {
            return Err(StoreError::Conflict {
                kind: T::KIND,
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

impl<T: Resource> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}
