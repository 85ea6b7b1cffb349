//! Store error types.

use thiserror::Error;

/// Errors from partition operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A partition's lock was poisoned by a panic in another thread.
    /// The partition's data can no longer be trusted.
    #[error("partition lock poisoned")]
    Poisoned,
}
