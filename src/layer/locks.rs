//! Per-layer advisory locks.
//!
//! Lifecycle transitions on the same id are serialized locally; transitions
//! on distinct ids never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct LayerLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LayerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` while holding the lock for `id`.
    pub fn with_lock<R>(&self, id: &str, f: impl FnOnce() -> R) -> R {
        let slot = Arc::clone(self.slots().entry(id.to_string()).or_default());

        let result = {
            let _guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f()
        };

        // Clones are only taken or released under the map lock, so once ours
        // is gone a count of one means nobody else holds or waits on the slot.
        let mut slots = self.slots();
        drop(slot);
        if slots.get(id).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            slots.remove(id);
        }

        result
    }

    /// Number of ids currently holding a slot.
    #[cfg(test)]
    fn active(&self) -> usize {
        self.slots().len()
    }
}
