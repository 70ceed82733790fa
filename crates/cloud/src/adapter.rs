//! Cloud-only adapter over a [`DocumentStore`].
//!
//! Readiness and the session are re-checked before every operation: the
//! session may end at any time, independently of this adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{join_all, try_join_all};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};

use finsync_core::auth::{Session, SessionProvider};
use finsync_core::model::{AppData, EntityKind, Record, Settings};
use finsync_core::storage::{
    AdapterState, ChangeCallback, ChangeEvent, Lifecycle, Listeners, StorageAdapter, Subscription,
};
use finsync_core::{Error, Result};

use crate::store::{CloudCollection, DocumentStore, StoredDocument};

fn record_fields(record: &Record) -> Result<Map<String, Value>> {
    match record.to_json()? {
        Value::Object(map) => Ok(map),
        other => Err(Error::storage(format!(
            "{} record did not serialize to an object: {}",
            record.kind(),
            other
        ))),
    }
}

fn decode_records(kind: EntityKind, docs: Vec<StoredDocument>) -> Vec<Record> {
    docs.into_iter()
        .filter_map(|doc| {
            let id = doc.id.clone();
            match Record::from_json(kind, doc.into_fields()) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!("[CloudStorage] Skipping malformed {} '{}': {}", kind, id, err);
                    None
                }
            }
        })
        .collect()
}

/// Never fails: fields this build cannot read are kept in `extra`.
fn decode_settings(doc: StoredDocument) -> Settings {
    let mut fields = doc.fields;
    fields.remove("id");
    Settings::from_json_lenient(Value::Object(fields)).unwrap_or_default()
}

pub struct CloudStorageAdapter {
    store: Option<Arc<dyn DocumentStore>>,
    sessions: Arc<dyn SessionProvider>,
    device_id: String,
    lifecycle: Lifecycle,
    listeners: Listeners<ChangeEvent>,
    bound_user: Mutex<Option<String>>,
    remote_watches: Mutex<Option<Subscription>>,
}

impl CloudStorageAdapter {
    /// `store` is `None` when the cloud backend is not configured; every
    /// operation then fails with `NotAvailable`.
    pub fn new(
        store: Option<Arc<dyn DocumentStore>>,
        sessions: Arc<dyn SessionProvider>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sessions,
            device_id: device_id.into(),
            lifecycle: Lifecycle::new("cloud"),
            listeners: Listeners::new(),
            bound_user: Mutex::new(None),
            remote_watches: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// User the adapter was initialized for.
    pub fn user_id(&self) -> Option<String> {
        lock(&self.bound_user).clone()
    }

    fn store(&self) -> Result<Arc<dyn DocumentStore>> {
        self.store
            .clone()
            .ok_or_else(|| Error::not_available("Cloud backend is not configured"))
    }

    fn session(&self) -> Result<Session> {
        let session = self
            .sessions
            .current_session()
            .ok_or_else(|| Error::not_authenticated("No active session"))?;

        if let Some(bound) = lock(&self.bound_user).as_deref() {
            if bound != session.user_id {
                return Err(Error::not_authenticated(format!(
                    "Session user changed since initialization (expected '{}')",
                    bound
                )));
            }
        }
        Ok(session)
    }

    /// Configuration, readiness and session, in that order.
    fn context(&self) -> Result<(Arc<dyn DocumentStore>, Session)> {
        let store = self.store()?;
        self.lifecycle.ensure_ready()?;
        let session = self.session()?;
        Ok((store, session))
    }

    /// Opens one watch per entity collection, once.
    fn open_remote_watches(&self, store: &dyn DocumentStore, session: &Session) -> Result<()> {
        let mut slot = lock(&self.remote_watches);
        if slot.is_some() {
            return Ok(());
        }

        let mut subscriptions = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let listeners = self.listeners.clone();
            subscriptions.push(store.watch(
                session,
                CloudCollection::for_entity(kind),
                Arc::new(move || listeners.emit(&ChangeEvent::RemoteChange(kind))),
            )?);
        }
        *slot = Some(Subscription::combine(subscriptions));
        debug!("[CloudStorage] Watching {} collections", EntityKind::ALL.len());
        Ok(())
    }

    async fn fetch_all(
        store: &dyn DocumentStore,
        session: &Session,
        kind: EntityKind,
    ) -> Result<Vec<Record>> {
        let docs = store
            .list(session, CloudCollection::for_entity(kind))
            .await?;
        Ok(decode_records(kind, docs))
    }

    async fn fetch_settings(store: &dyn DocumentStore, session: &Session) -> Result<Option<Settings>> {
        let doc = store
            .get(session, CloudCollection::Settings, CloudCollection::SETTINGS_DOC_ID)
            .await?;
        Ok(doc.map(decode_settings))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl StorageAdapter for CloudStorageAdapter {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn initialize(&self) -> Result<()> {
        self.lifecycle.ensure_not_disconnected()?;
        if self.lifecycle.is_ready() {
            return Ok(());
        }

        let store = self.store()?;
        let session = self.session()?;

        // Round trip to verify credentials and reachability.
        store
            .get(&session, CloudCollection::Settings, CloudCollection::SETTINGS_DOC_ID)
            .await?;

        *lock(&self.bound_user) = Some(session.user_id.clone());
        if !self.listeners.is_empty() {
            self.open_remote_watches(store.as_ref(), &session)?;
        }
        self.lifecycle.mark_ready()?;
        info!(
            "[CloudStorage] Initialized for user {} (device {})",
            session.user_id, self.device_id
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
            let watches = lock(&self.remote_watches).take();
            drop(watches);
            self.listeners.clear();
            info!("[CloudStorage] Disconnected");
        }
        Ok(())
    }

    async fn get_all(&self, kind: EntityKind) -> Result<Vec<Record>> {
        let (store, session) = self.context()?;
        Self::fetch_all(store.as_ref(), &session, kind).await
    }

    async fn get_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        let (store, session) = self.context()?;
        let doc = store
            .get(&session, CloudCollection::for_entity(kind), id)
            .await?;
        doc.map(|doc| Record::from_json(kind, doc.into_fields()))
            .transpose()
    }

    async fn create(&self, record: Record) -> Result<()> {
        let (store, session) = self.context()?;
        let fields = record_fields(&record)?;
        store
            .set(
                &session,
                CloudCollection::for_entity(record.kind()),
                record.id(),
                fields,
                &self.device_id,
            )
            .await?;
        Ok(())
    }

    async fn update(&self, record: Record) -> Result<()> {
        let (store, session) = self.context()?;
        let fields = record_fields(&record)?;
        store
            .update(
                &session,
                CloudCollection::for_entity(record.kind()),
                record.id(),
                fields,
                &self.device_id,
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        let (store, session) = self.context()?;
        store
            .delete(&session, CloudCollection::for_entity(kind), id)
            .await?;
        Ok(())
    }

    async fn get_settings(&self) -> Result<Option<Settings>> {
        let (store, session) = self.context()?;
        Self::fetch_settings(store.as_ref(), &session).await
    }

    async fn save_settings(&self, settings: Settings) -> Result<()> {
        let (store, session) = self.context()?;
        let fields = match serde_json::to_value(&settings)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        store
            .set(
                &session,
                CloudCollection::Settings,
                CloudCollection::SETTINGS_DOC_ID,
                fields,
                &self.device_id,
            )
            .await?;
        Ok(())
    }

    /// Lookup failures are logged and reported as "unknown".
    async fn get_last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let (store, session) = self.context()?;
        let collections = EntityKind::ALL
            .iter()
            .map(|kind| CloudCollection::for_entity(*kind))
            .chain(std::iter::once(CloudCollection::Settings));

        let listings = join_all(collections.map(|c| store.list(&session, c))).await;
        let mut latest: Option<DateTime<Utc>> = None;
        for listing in listings {
            match listing {
                Ok(docs) => {
                    latest = docs
                        .iter()
                        .filter_map(|doc| doc.updated_at)
                        .chain(latest)
                        .max();
                }
                Err(err) => {
                    warn!("[CloudStorage] Could not read last sync time: {}", err);
                    return Ok(None);
                }
            }
        }
        Ok(latest)
    }

    /// The cloud is the source of truth; nothing to reconcile.
    async fn sync_now(&self) -> Result<()> {
        self.context().map(|_| ())
    }

    fn on_changed(&self, callback: ChangeCallback) -> Result<Subscription> {
        self.lifecycle.ensure_not_disconnected()?;
        let subscription = self.listeners.subscribe(callback);
        if self.lifecycle.is_ready() {
            let (store, session) = self.context()?;
            self.open_remote_watches(store.as_ref(), &session)?;
        }
        Ok(subscription)
    }

    async fn export_data(&self) -> Result<AppData> {
        let (store, session) = self.context()?;
        let fetches = EntityKind::ALL
            .iter()
            .map(|kind| Self::fetch_all(store.as_ref(), &session, *kind));
        let (collections, settings) = futures::try_join!(
            try_join_all(fetches),
            Self::fetch_settings(store.as_ref(), &session)
        )?;

        let mut data = AppData {
            settings,
            ..AppData::default()
        };
        for (kind, records) in EntityKind::ALL.into_iter().zip(collections) {
            data.set_records(kind, records);
        }
        Ok(data)
    }

    /// Overwrites the remote collections: ids absent from `data` are deleted.
    async fn import_data(&self, data: AppData) -> Result<()> {
        let (store, session) = self.context()?;
        for kind in EntityKind::ALL {
            let collection = CloudCollection::for_entity(kind);
            let incoming = data.records(kind);
            let existing = store.list(&session, collection).await?;
            for doc in existing {
                if !incoming.iter().any(|r| r.id() == doc.id) {
                    store.delete(&session, collection, &doc.id).await?;
                }
            }
            for record in &incoming {
                store
                    .set(
                        &session,
                        collection,
                        record.id(),
                        record_fields(record)?,
                        &self.device_id,
                    )
                    .await?;
            }
        }
        let imported = data.record_count();
        if let Some(settings) = data.settings {
            self.save_settings(settings).await?;
        }
        info!("[CloudStorage] Imported {} records", imported);
        Ok(())
    }
}
