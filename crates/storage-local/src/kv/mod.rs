//! Synchronous key/value storage shared by every execution context on a device.

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use std::sync::atomic::{AtomicU64, Ordering};

use finsync_core::storage::{Callback, Subscription};

use crate::errors::Result;

/// Identifies the execution context (window, tab, process handle) that wrote a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocates an id distinct from every other id issued in this process.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Emitted to watchers after every successful `set`/`remove`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub origin: ContextId,
}

/// Device-resident key/value storage.
///
/// Each `set` replaces the whole value atomically. Watchers see every write,
/// including their own; filtering by `origin` is up to them.
pub trait KvStore: Send + Sync {
    /// Fails when the medium is disabled or unreachable.
    fn probe(&self) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, origin: ContextId, key: &str, value: &str) -> Result<()>;

    fn remove(&self, origin: ContextId, key: &str) -> Result<()>;

    fn watch(&self, callback: Callback<StorageEvent>) -> Subscription;
}
