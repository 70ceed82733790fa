//! Wiring for embedders: configuration, the backend factory, the storage
//! context that owns them, and the thin mutation API on top.

pub mod config;
pub mod context;
pub mod factory;
pub mod ledger;

pub use config::StorageConfig;
pub use context::StorageContext;
pub use factory::{BackendDependencies, BackendFactory};
pub use ledger::{CascadeReport, Ledger};
