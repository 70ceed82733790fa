use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use finsync_core::storage::{Callback, Listeners, Subscription};

use super::{ContextId, KvStore, StorageEvent};
use crate::errors::{Result, StorageError};

/// In-process store. Used for ephemeral sessions and as a test fixture.
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
    available: AtomicBool,
    listeners: Listeners<StorageEvent>,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            listeners: Listeners::new(),
        }
    }

    /// Simulates storage being disabled (private mode, quota lockout).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("memory store is disabled"));
        }
        self.entries
            .lock()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}

impl KvStore for MemoryKvStore {
    fn probe(&self) -> Result<()> {
        self.entries().map(|_| ())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, origin: ContextId, key: &str, value: &str) -> Result<()> {
        let old_value = self.entries()?.insert(key.to_string(), value.to_string());
        self.listeners.emit(&StorageEvent {
            key: key.to_string(),
            old_value,
            new_value: Some(value.to_string()),
            origin,
        });
        Ok(())
    }

    fn remove(&self, origin: ContextId, key: &str) -> Result<()> {
        let old_value = self.entries()?.remove(key);
        if old_value.is_some() {
            self.listeners.emit(&StorageEvent {
                key: key.to_string(),
                old_value,
                new_value: None,
                origin,
            });
        }
        Ok(())
    }

    fn watch(&self, callback: Callback<StorageEvent>) -> Subscription {
        self.listeners.subscribe(callback)
    }
}
