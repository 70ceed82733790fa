//! Hybrid backend: a local replica kept consistent with the cloud.
//!
//! Reads come from the local replica. Writes fan out to both stores.
//! Reconciliation pulls the full cloud state and makes the replica match it;
//! the cloud is authoritative for both content and membership.

pub mod hybrid;
pub mod reconcile;

pub use hybrid::HybridAdapter;
pub use reconcile::{plan_collection, CollectionPlan, ReconcileReport};
