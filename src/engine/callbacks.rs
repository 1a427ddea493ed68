//! Explicit callback registration.
//!
//! Emitters own a `Callbacks<T>` list. Subscribers get a [`CallbackId`] back
//! and can unsubscribe with it. Callbacks are invoked directly on the
//! emitting thread, after the emitter released its own locks.

use crate::engine::id::CallbackId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Callbacks<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(CallbackId, Callback<T>)>>,
}

impl<T> Callbacks<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: CallbackId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every subscriber. The list is cloned first so a callback may
    /// subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, event: &T) {
        let callbacks: Vec<Callback<T>> =
            self.entries.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}
