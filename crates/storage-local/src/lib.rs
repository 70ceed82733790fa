//! Device-resident storage backend.
//!
//! Every collection and the settings document live in one versioned JSON blob
//! under a single key of a [`kv::KvStore`]. Writes are whole-blob
//! read-modify-write operations.

pub mod adapter;
pub mod device;
pub mod errors;
pub mod kv;

pub use adapter::{LocalStorageAdapter, STATE_KEY};
pub use device::{DeviceIdentity, DEVICE_ID_KEY};
pub use errors::StorageError;
pub use kv::{ContextId, KvStore, MemoryKvStore, SqliteKvStore, StorageEvent};
