//! Lock helpers shared by the session workers

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a worker panicked while holding it
///
/// A panicking worker must not take the acquisition loop down with it, so
/// poisoning is ignored and the guard is returned as-is.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
