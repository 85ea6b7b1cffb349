//! Partition: one independently-locked slice of the keyspace.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;

use crate::error::StoreError;

/// One partition of the keyspace: a map from key to the stored wire
/// bytes, guarded by a reader/writer lock. Reads take the shared lock,
/// writes the exclusive lock; partitions never contend with each other.
#[derive(Debug, Default)]
pub struct Partition {
    map: RwLock<HashMap<String, Bytes>>,
}

impl Partition {
    /// Inserts or overwrites a key.
    pub fn set(&self, key: String, value: Bytes) -> Result<(), StoreError> {
        let mut map = self.map.write().map_err(|_| StoreError::Poisoned)?;
        map.insert(key, value);
        Ok(())
    }

    /// Removes a key, returning whether it was present.
    pub fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut map = self.map.write().map_err(|_| StoreError::Poisoned)?;
        Ok(map.remove(key).is_some())
    }

    /// Returns the stored bytes for a key, verbatim.
    pub fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let map = self.map.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(key).cloned())
    }

    /// Returns the number of keys in this partition.
    pub fn len(&self) -> Result<usize, StoreError> {
        let map = self.map.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.len())
    }

    /// Returns `true` if this partition holds no keys.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}
