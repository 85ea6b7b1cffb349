//! cinder-store: the partitioned storage engine.
//!
//! Owns the keyspace partitions and the command executor that routes
//! decoded commands to them. Partitions are independent reader/writer
//! locked maps, so commands on unrelated keys never contend.

pub mod error;
pub mod executor;
pub mod partition;
pub mod store;

pub use error::StoreError;
pub use executor::{execute, Outcome};
pub use partition::Partition;
pub use store::{PartitionedStore, DEFAULT_PARTITIONS};
