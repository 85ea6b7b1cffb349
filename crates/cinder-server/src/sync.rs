//! Poison-recovering lock acquisition.

use std::sync::{Mutex, MutexGuard};

/// Acquires a mutex, stripping poisoning.
///
/// A panic inside a pipeline stage poisons the mutex it held; the
/// teardown path still needs the guard to remove the connection, so the
/// poison marker is discarded and the inner value used as-is.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
