use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use finsync_core::auth::Session;
use finsync_core::storage::{callback, Listeners, Subscription};

use super::{CloudCollection, DocumentStore, RemoteChangeCallback, StoredDocument};
use crate::error::{CloudError, Result};

type Collection = BTreeMap<String, StoredDocument>;

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, HashMap<CloudCollection, Collection>>,
    last_stamp: Option<DateTime<Utc>>,
}

impl MemoryState {
    fn collection_mut(&mut self, user_id: &str, collection: CloudCollection) -> &mut Collection {
        self.users
            .entry(user_id.to_string())
            .or_default()
            .entry(collection)
            .or_default()
    }

    fn collection(&self, user_id: &str, collection: CloudCollection) -> Option<&Collection> {
        self.users.get(user_id).and_then(|c| c.get(&collection))
    }

    /// Server clock: strictly increasing even when writes land in the same instant.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}

/// In-process document store with the same semantics as the remote service.
///
/// Watchers are notified synchronously after each write. `set_online(false)`
/// makes every call fail as if the network were down.
pub struct MemoryDocumentStore {
    state: Mutex<MemoryState>,
    online: AtomicBool,
    watchers: Mutex<HashMap<(String, CloudCollection), Listeners<()>>>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            online: AtomicBool::new(true),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if !self.is_online() {
            return Err(CloudError::unavailable("network unreachable"));
        }
        Ok(match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        })
    }

    fn watchers(&self) -> MutexGuard<'_, HashMap<(String, CloudCollection), Listeners<()>>> {
        match self.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, user_id: &str, collection: CloudCollection) {
        let listeners = self
            .watchers()
            .get(&(user_id.to_string(), collection))
            .cloned();
        if let Some(listeners) = listeners {
            listeners.emit(&());
        }
    }

    fn write(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
        fields: Map<String, Value>,
        device_id: &str,
        must_exist: bool,
    ) -> Result<StoredDocument> {
        let stored = {
            let mut state = self.state()?;
            let stamp = state.next_stamp();
            let docs = state.collection_mut(&session.user_id, collection);
            if must_exist && !docs.contains_key(id) {
                return Err(CloudError::not_found(collection, id));
            }
            let mut fields = fields;
            fields.insert("id".to_string(), Value::String(id.to_string()));
            let doc = StoredDocument {
                id: id.to_string(),
                fields,
                updated_at: Some(stamp),
                device_id: Some(device_id.to_string()),
            };
            docs.insert(id.to_string(), doc.clone());
            doc
        };
        self.notify(&session.user_id, collection);
        Ok(stored)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list(
        &self,
        session: &Session,
        collection: CloudCollection,
    ) -> Result<Vec<StoredDocument>> {
        let state = self.state()?;
        Ok(state
            .collection(&session.user_id, collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
    ) -> Result<Option<StoredDocument>> {
        let state = self.state()?;
        Ok(state
            .collection(&session.user_id, collection)
            .and_then(|docs| docs.get(id).cloned()))
    }

    async fn set(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
        fields: Map<String, Value>,
        device_id: &str,
    ) -> Result<StoredDocument> {
        self.write(session, collection, id, fields, device_id, false)
    }

    async fn update(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
        fields: Map<String, Value>,
        device_id: &str,
    ) -> Result<StoredDocument> {
        self.write(session, collection, id, fields, device_id, true)
    }

    async fn delete(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
    ) -> Result<()> {
        {
            let mut state = self.state()?;
            let docs = state.collection_mut(&session.user_id, collection);
            if docs.remove(id).is_none() {
                return Err(CloudError::not_found(collection, id));
            }
        }
        self.notify(&session.user_id, collection);
        Ok(())
    }

    fn watch(
        &self,
        session: &Session,
        collection: CloudCollection,
        on_change: RemoteChangeCallback,
    ) -> Result<Subscription> {
        let listeners = self
            .watchers()
            .entry((session.user_id.clone(), collection))
            .or_default()
            .clone();
        Ok(listeners.subscribe(callback(move |_: &()| on_change())))
    }
}
