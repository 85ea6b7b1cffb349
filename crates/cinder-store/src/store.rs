//! The partitioned store: a fixed array of independently-locked
//! partitions addressed by a deterministic key-to-partition function.
//!
//! ## partitioning
//!
//! A key belongs to exactly one partition, chosen from its first byte:
//! `first_byte(key) % partition_count`, with the empty key mapping to
//! partition 0. The function is O(1) and independent of key length.
//! Under keys drawn from many first bytes, lock contention drops by
//! roughly a factor of the partition count; a client that picks keys
//! sharing a first byte can hotspot one partition, which is an accepted
//! tradeoff of the cheap function.

use bytes::Bytes;

use crate::error::StoreError;
use crate::partition::Partition;

/// Default number of partitions.
pub const DEFAULT_PARTITIONS: usize = 10;

/// A fixed set of partitions created at startup and living for the
/// process lifetime. All operations route by [`PartitionedStore::partition_index`].
#[derive(Debug)]
pub struct PartitionedStore {
    partitions: Box<[Partition]>,
}

impl PartitionedStore {
    /// Creates a store with `count` partitions.
    ///
    /// Panics if `count` is zero.
    pub fn new(count: usize) -> Self {
        assert!(count > 0, "partition count must be at least 1");
        let partitions = (0..count).map(|_| Partition::default()).collect();
        Self { partitions }
    }

    /// Returns the number of partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Returns the partition index a key routes to.
    ///
    /// Depends only on the key's first byte; the empty key routes to 0.
    pub fn partition_index(&self, key: &str) -> usize {
        match key.as_bytes().first() {
            Some(&b) => b as usize % self.partitions.len(),
            None => 0,
        }
    }

    /// Inserts or overwrites a key in its partition.
    pub fn set(&self, key: String, value: Bytes) -> Result<(), StoreError> {
        self.partitions[self.partition_index(&key)].set(key, value)
    }

    /// Removes a key from its partition, returning whether it existed.
    pub fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.partitions[self.partition_index(key)].del(key)
    }

    /// Returns the stored bytes for a key, verbatim.
    pub fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.partitions[self.partition_index(key)].get(key)
    }

    /// Total key count across all partitions.
    pub fn len(&self) -> Result<usize, StoreError> {
        let mut total = 0;
        for p in self.partitions.iter() {
            total += p.len()?;
        }
        Ok(total)
    }

    /// Returns `true` when no partition holds a key.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl Default for PartitionedStore {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}
