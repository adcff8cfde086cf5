//! Subscriber lists with idempotent removal handles

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

trait RemoveSlot: Send + Sync {
    fn remove(&self, id: u64);
}

impl<T: 'static> RemoveSlot for Mutex<Slots<T>> {
    fn remove(&self, id: u64) {
        self.lock().entries.retain(|(entry_id, _)| *entry_id != id);
    }
}

/// A list of callbacks receiving `&T`
pub struct CallbackList<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: 'static> CallbackList<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback; dropping the handle does not remove it
    pub fn add<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.entries.push((id, Arc::new(callback)));
            id
        };
        let slots: Arc<dyn RemoveSlot> = self.slots.clone();
        CallbackHandle {
            id,
            slots: Arc::downgrade(&slots),
        }
    }

    /// Invoke every callback. The lock is released first so callbacks may
    /// add or remove entries.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .slots
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for CallbackList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CallbackList<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

/// Removes its callback when `remove()` is called; repeat calls are no-ops
#[derive(Clone)]
pub struct CallbackHandle {
    id: u64,
    slots: Weak<dyn RemoveSlot>,
}

impl CallbackHandle {
    pub fn remove(&self) {
        if let Some(slots) = self.slots.upgrade() {
            slots.remove(self.id);
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}
