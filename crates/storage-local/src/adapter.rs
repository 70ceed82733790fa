//! Local-only adapter over a single versioned blob.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::sync::{Arc, Mutex};

use finsync_core::migrations::{load_persisted, PersistedState, CURRENT_SCHEMA_VERSION};
use finsync_core::model::{AppData, EntityKind, Record, Settings};
use finsync_core::storage::{
    callback, AdapterState, ChangeCallback, ChangeEvent, Lifecycle, Listeners, StorageAdapter,
    Subscription,
};
use finsync_core::{Error, Result};

use crate::kv::{ContextId, KvStore, StorageEvent};

/// Storage key holding the whole persisted state.
pub const STATE_KEY: &str = "finsync-state";

pub struct LocalStorageAdapter {
    store: Arc<dyn KvStore>,
    context: ContextId,
    lifecycle: Lifecycle,
    listeners: Listeners<ChangeEvent>,
    store_watch: Mutex<Option<Subscription>>,
}

impl LocalStorageAdapter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_context(store, ContextId::fresh())
    }

    /// Builds an adapter that writes as `context`. Two adapters sharing a store
    /// with different contexts observe each other's writes.
    pub fn with_context(store: Arc<dyn KvStore>, context: ContextId) -> Self {
        Self {
            store,
            context,
            lifecycle: Lifecycle::new("local"),
            listeners: Listeners::new(),
            store_watch: Mutex::new(None),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    /// Re-reads the latest blob. Every mutation starts here.
    fn read_state(&self) -> Result<PersistedState> {
        let raw = self.store.get(STATE_KEY)?;
        Ok(load_persisted(raw.as_deref())?.state)
    }

    fn write_state(&self, state: &PersistedState) -> Result<()> {
        let serialized = serde_json::to_string(state)?;
        self.store.set(self.context, STATE_KEY, &serialized)?;
        Ok(())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut PersistedState) -> Result<T>) -> Result<T> {
        self.lifecycle.ensure_ready()?;
        let mut state = self.read_state()?;
        let result = f(&mut state)?;
        state.version = CURRENT_SCHEMA_VERSION;
        self.write_state(&state)?;
        Ok(result)
    }

    fn attach_store_watch(&self) {
        let context = self.context;
        let listeners = self.listeners.clone();
        let subscription = self.store.watch(callback(move |event: &StorageEvent| {
            if event.key != STATE_KEY || event.origin == context {
                return;
            }
            if event.old_value == event.new_value {
                return;
            }
            debug!("[LocalStorage] State changed in another context");
            listeners.emit(&ChangeEvent::ExternalWrite);
        }));

        let mut slot = match self.store_watch.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(subscription);
    }

    fn detach_store_watch(&self) {
        let subscription = match self.store_watch.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(subscription);
    }
}

#[async_trait]
impl StorageAdapter for LocalStorageAdapter {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn initialize(&self) -> Result<()> {
        self.lifecycle.ensure_not_disconnected()?;
        if self.lifecycle.is_ready() {
            return Ok(());
        }

        self.store.probe().map_err(|e| {
            Error::not_available(format!("Local storage is not accessible: {}", e))
        })?;

        let raw = self.store.get(STATE_KEY)?;
        let loaded = load_persisted(raw.as_deref())?;
        if loaded.needs_write {
            self.write_state(&loaded.state)?;
        }

        self.attach_store_watch();
        self.lifecycle.mark_ready()?;
        info!(
            "[LocalStorage] Initialized ({} records, schema v{})",
            loaded.state.data.record_count(),
            loaded.state.version
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    fn state(&self) -> AdapterState {
        self.lifecycle.state()
    }

    async fn disconnect(&self) -> Result<()> {
        if self.lifecycle.mark_disconnected() {
            self.detach_store_watch();
            self.listeners.clear();
            info!("[LocalStorage] Disconnected");
        }
        Ok(())
    }

    async fn get_all(&self, kind: EntityKind) -> Result<Vec<Record>> {
        self.lifecycle.ensure_ready()?;
        Ok(self.read_state()?.data.records(kind))
    }

    async fn get_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        self.lifecycle.ensure_ready()?;
        Ok(self
            .read_state()?
            .data
            .records(kind)
            .into_iter()
            .find(|r| r.id() == id))
    }

    async fn create(&self, record: Record) -> Result<()> {
        let kind = record.kind();
        self.mutate(|state| {
            let mut records = state.data.records(kind);
            records.push(record);
            state.data.set_records(kind, records);
            Ok(())
        })
    }

    async fn update(&self, record: Record) -> Result<()> {
        let kind = record.kind();
        self.mutate(|state| {
            let mut records = state.data.records(kind);
            let slot = records
                .iter_mut()
                .find(|r| r.id() == record.id())
                .ok_or_else(|| Error::not_found(kind, record.id()))?;
            *slot = record;
            state.data.set_records(kind, records);
            Ok(())
        })
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        self.mutate(|state| {
            let mut records = state.data.records(kind);
            let before = records.len();
            records.retain(|r| r.id() != id);
            if records.len() == before {
                return Err(Error::not_found(kind, id));
            }
            state.data.set_records(kind, records);
            Ok(())
        })
    }

    async fn get_settings(&self) -> Result<Option<Settings>> {
        self.lifecycle.ensure_ready()?;
        Ok(self.read_state()?.data.settings)
    }

    async fn save_settings(&self, settings: Settings) -> Result<()> {
        self.mutate(|state| {
            state.data.settings = Some(settings);
            Ok(())
        })
    }

    async fn get_last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.lifecycle.ensure_ready()?;
        Ok(None)
    }

    async fn sync_now(&self) -> Result<()> {
        self.lifecycle.ensure_ready()
    }

    fn on_changed(&self, callback: ChangeCallback) -> Result<Subscription> {
        self.lifecycle.ensure_not_disconnected()?;
        Ok(self.listeners.subscribe(callback))
    }

    async fn export_data(&self) -> Result<AppData> {
        self.lifecycle.ensure_ready()?;
        Ok(self.read_state()?.data)
    }

    async fn import_data(&self, data: AppData) -> Result<()> {
        self.lifecycle.ensure_ready()?;
        info!(
            "[LocalStorage] Importing {} records (overwrites local state)",
            data.record_count()
        );
        // Unknown top-level keys from other clients survive an import.
        let mut state = PersistedState::new(data);
        state.extra = self.read_state()?.extra;
        self.write_state(&state)
    }
}
