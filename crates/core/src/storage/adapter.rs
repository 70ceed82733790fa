//! Storage adapter contract implemented by the local, cloud and hybrid backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

use crate::errors::{Error, Result};
use crate::model::{AppData, Entity, EntityKind, Record, Settings};

use super::listeners::{ChangeCallback, Subscription};

/// Backend lifecycle. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Ready,
    Disconnected,
}

/// Tracks an adapter's `Uninitialized -> Ready -> Disconnected` transitions.
#[derive(Debug)]
pub struct Lifecycle {
    backend: &'static str,
    state: Mutex<AdapterState>,
}

impl Lifecycle {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            state: Mutex::new(AdapterState::Uninitialized),
        }
    }

    fn guard(&self) -> MutexGuard<'_, AdapterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> AdapterState {
        *self.guard()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == AdapterState::Ready
    }

    pub fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            AdapterState::Ready => Ok(()),
            AdapterState::Uninitialized => Err(Error::not_ready(format!(
                "{} adapter is not initialized",
                self.backend
            ))),
            AdapterState::Disconnected => Err(Error::not_ready(format!(
                "{} adapter is disconnected",
                self.backend
            ))),
        }
    }

    pub fn ensure_not_disconnected(&self) -> Result<()> {
        if self.state() == AdapterState::Disconnected {
            return Err(Error::not_ready(format!(
                "{} adapter is disconnected",
                self.backend
            )));
        }
        Ok(())
    }

    pub fn mark_ready(&self) -> Result<()> {
        let mut state = self.guard();
        if *state == AdapterState::Disconnected {
            return Err(Error::not_ready(format!(
                "{} adapter is disconnected and cannot be re-initialized",
                self.backend
            )));
        }
        *state = AdapterState::Ready;
        Ok(())
    }

    /// Returns false when the adapter was already disconnected.
    pub fn mark_disconnected(&self) -> bool {
        let mut state = self.guard();
        let changed = *state != AdapterState::Disconnected;
        *state = AdapterState::Disconnected;
        changed
    }
}

/// Capability set every backend exposes.
///
/// `create` on a duplicate id is backend-defined (local appends, cloud
/// overwrites); callers must not rely on uniqueness enforcement here.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Opens storage, verifies authentication and wires change sources.
    async fn initialize(&self) -> Result<()>;

    /// Non-blocking capability check.
    fn is_ready(&self) -> bool;

    fn state(&self) -> AdapterState;

    /// Releases every live subscription. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    async fn get_all(&self, kind: EntityKind) -> Result<Vec<Record>>;

    async fn get_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Record>>;

    async fn create(&self, record: Record) -> Result<()>;

    /// Replaces the record wholesale. Fails with `NotFound` for an unknown id.
    async fn update(&self, record: Record) -> Result<()>;

    /// Fails with `NotFound` for an unknown id.
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()>;

    async fn get_settings(&self) -> Result<Option<Settings>>;

    async fn save_settings(&self, settings: Settings) -> Result<()>;

    /// Most recent `updatedAt` across all collections, `None` when untracked.
    async fn get_last_sync_time(&self) -> Result<Option<DateTime<Utc>>>;

    /// Forces an immediate reconciliation. No-op without a remote counterpart.
    async fn sync_now(&self) -> Result<()>;

    /// Subscribes to change notifications. Safe before `initialize()`;
    /// fails with `NotReady` after `disconnect()`.
    fn on_changed(&self, callback: ChangeCallback) -> Result<Subscription>;

    /// Reads every collection and the settings document.
    async fn export_data(&self) -> Result<AppData>;

    /// Replaces every collection and the settings document. Bypasses sync fan-out.
    async fn import_data(&self, data: AppData) -> Result<()>;
}

/// Typed helpers over [`StorageAdapter`].
#[async_trait]
pub trait StorageAdapterExt: StorageAdapter {
    async fn get_all_of<T: Entity>(&self) -> Result<Vec<T>> {
        Ok(self
            .get_all(T::KIND)
            .await?
            .into_iter()
            .filter_map(T::from_record)
            .collect())
    }

    async fn get_of<T: Entity>(&self, id: &str) -> Result<Option<T>> {
        Ok(self.get_by_id(T::KIND, id).await?.and_then(T::from_record))
    }

    async fn create_entity<T: Entity>(&self, entity: T) -> Result<()> {
        self.create(entity.into_record()).await
    }

    async fn update_entity<T: Entity>(&self, entity: T) -> Result<()> {
        self.update(entity.into_record()).await
    }

    async fn delete_of<T: Entity>(&self, id: &str) -> Result<()> {
        self.delete(T::KIND, id).await
    }
}

impl<A: StorageAdapter + ?Sized> StorageAdapterExt for A {}
