//! Shared registry of active instances.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::domain::instance::InstanceHandle;

/// The only state shared across concurrent tasks: a map from instance id to
/// its handle, used to know what is still running (and what to terminate).
///
/// Insert happens when a task is scheduled; removal happens from teardown and
/// is idempotent — removing an absent id is a no-op, not an error.
#[derive(Debug, Default)]
pub struct ActiveInstanceRegistry {
    inner: Mutex<HashMap<String, InstanceHandle>>,
}

impl ActiveInstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: InstanceHandle) {
        self.lock().insert(handle.id.clone(), handle);
    }

    /// Removes `id`, returning the handle if it was present.
    pub fn remove(&self, id: &str) -> Option<InstanceHandle> {
        self.lock().remove(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the handles still registered, for final reporting.
    ///
    /// Call only after every task has reached a terminal state.
    #[must_use]
    pub fn snapshot(&self) -> Vec<InstanceHandle> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, InstanceHandle>> {
        // A poisoned lock only means another task panicked mid-mutation of a
        // HashMap insert/remove, which cannot leave it inconsistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
