//! Remote document store: per-user sibling collections plus a singleton settings document.

mod memory;
mod rest;

pub use memory::MemoryDocumentStore;
pub use rest::RestDocumentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use finsync_core::auth::Session;
use finsync_core::model::EntityKind;
use finsync_core::storage::Subscription;

use crate::error::{CloudError, Result};

pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const DEVICE_ID_FIELD: &str = "deviceId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CloudCollection {
    Transactions,
    Assets,
    Budgets,
    Reminders,
    Settings,
}

impl CloudCollection {
    /// Id of the single document in the settings collection.
    pub const SETTINGS_DOC_ID: &'static str = "main";

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudCollection::Transactions => "transactions",
            CloudCollection::Assets => "assets",
            CloudCollection::Budgets => "budgets",
            CloudCollection::Reminders => "reminders",
            CloudCollection::Settings => "settings",
        }
    }

    pub fn for_entity(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Transaction => CloudCollection::Transactions,
            EntityKind::Asset => CloudCollection::Assets,
            EntityKind::Budget => CloudCollection::Budgets,
            EntityKind::Reminder => CloudCollection::Reminders,
        }
    }

    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            CloudCollection::Transactions => Some(EntityKind::Transaction),
            CloudCollection::Assets => Some(EntityKind::Asset),
            CloudCollection::Budgets => Some(EntityKind::Budget),
            CloudCollection::Reminders => Some(EntityKind::Reminder),
            CloudCollection::Settings => None,
        }
    }
}

impl fmt::Display for CloudCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document split into its domain fields and the sync envelope.
///
/// On the wire the envelope sits next to the domain fields:
/// `{ "id": .., <fields>.., "updatedAt": .., "deviceId": .. }`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Map<String, Value>,
    pub updated_at: Option<DateTime<Utc>>,
    pub device_id: Option<String>,
}

impl StoredDocument {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
            updated_at: None,
            device_id: None,
        }
    }

    pub fn from_wire(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(CloudError::InvalidDocument(
                "document is not a JSON object".to_string(),
            ));
        };

        let id = fields
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CloudError::InvalidDocument("document has no id".to_string()))?;

        let updated_at = match fields.remove(UPDATED_AT_FIELD) {
            Some(Value::String(raw)) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| {
                        CloudError::InvalidDocument(format!("invalid {}: {}", UPDATED_AT_FIELD, e))
                    })?
                    .with_timezone(&Utc),
            ),
            _ => None,
        };
        let device_id = match fields.remove(DEVICE_ID_FIELD) {
            Some(Value::String(device)) => Some(device),
            _ => None,
        };

        Ok(Self {
            id,
            fields,
            updated_at,
            device_id,
        })
    }

    pub fn into_wire(self) -> Value {
        let mut wire = self.fields;
        wire.insert("id".to_string(), Value::String(self.id));
        if let Some(updated_at) = self.updated_at {
            wire.insert(
                UPDATED_AT_FIELD.to_string(),
                Value::String(updated_at.to_rfc3339()),
            );
        }
        if let Some(device_id) = self.device_id {
            wire.insert(DEVICE_ID_FIELD.to_string(), Value::String(device_id));
        }
        Value::Object(wire)
    }

    /// Domain fields only, envelope stripped.
    pub fn into_fields(self) -> Value {
        Value::Object(self.fields)
    }
}

pub type RemoteChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Per-user remote collections.
///
/// Writes are stamped with a server-assigned `updatedAt` (monotonic per
/// document) and the writing device's id. Notifications carry no diff.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, session: &Session, collection: CloudCollection)
        -> Result<Vec<StoredDocument>>;

    async fn get(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
    ) -> Result<Option<StoredDocument>>;

    /// Creates or overwrites the document.
    async fn set(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
        fields: Map<String, Value>,
        device_id: &str,
    ) -> Result<StoredDocument>;

    /// Replaces an existing document. `NotFound` when absent.
    async fn update(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
        fields: Map<String, Value>,
        device_id: &str,
    ) -> Result<StoredDocument>;

    /// `NotFound` when absent.
    async fn delete(&self, session: &Session, collection: CloudCollection, id: &str)
        -> Result<()>;

    /// Invokes `on_change` on any change to the collection until the
    /// subscription is dropped.
    fn watch(
        &self,
        session: &Session,
        collection: CloudCollection,
        on_change: RemoteChangeCallback,
    ) -> Result<Subscription>;
}
