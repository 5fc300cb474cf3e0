//! The group processing lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Serializes everything that reads or changes group state.
///
/// Held for the whole of a message batch. Caches bound to it assert (in
/// debug builds) that it is held whenever they are touched.
#[derive(Debug, Default)]
pub struct GroupProcessingLock {
    inner: Mutex<()>,
    held: AtomicBool,
}

impl GroupProcessingLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Block until the lock is available.
    pub fn acquire(&self) -> GroupProcessingGuard<'_> {
        // The mutex protects no data, so a panic while held leaves nothing torn.
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.held.store(true, Ordering::Release);
        GroupProcessingGuard {
            _guard: guard,
            held: &self.held,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[must_use = "the lock is released when the guard is dropped"]
#[derive(Debug)]
pub struct GroupProcessingGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    held: &'a AtomicBool,
}

impl Drop for GroupProcessingGuard<'_> {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
