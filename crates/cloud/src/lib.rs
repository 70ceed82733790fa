//! Remote per-user document store backend.

pub mod adapter;
pub mod config;
pub mod error;
pub mod store;

pub use adapter::CloudStorageAdapter;
pub use config::CloudConfig;
pub use error::{CloudError, Result};
pub use store::{
    CloudCollection, DocumentStore, MemoryDocumentStore, RestDocumentStore, StoredDocument,
};
