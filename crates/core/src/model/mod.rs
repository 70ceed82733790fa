//! Record model: entity shapes and their identity rules.
//!
//! A record's `id` is client-generated, immutable after creation and unique
//! within its collection. Every other field is replaced wholesale on update.

mod records;
mod settings;

pub use records::*;
pub use settings::*;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

use crate::errors::Result;

/// Entity collections that participate in CRUD and reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Transaction,
    Asset,
    Budget,
    Reminder,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Transaction,
        EntityKind::Asset,
        EntityKind::Budget,
        EntityKind::Reminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Transaction => "transaction",
            EntityKind::Asset => "asset",
            EntityKind::Budget => "budget",
            EntityKind::Reminder => "reminder",
        }
    }

    /// Collection key used in the persisted blob and in the cloud layout.
    pub fn collection_name(&self) -> &'static str {
        match self {
            EntityKind::Transaction => "transactions",
            EntityKind::Asset => "assets",
            EntityKind::Budget => "budgets",
            EntityKind::Reminder => "reminders",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record of any entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Transaction(Transaction),
    Asset(Asset),
    Budget(Budget),
    Reminder(Reminder),
}

impl Record {
    pub fn id(&self) -> &str {
        match self {
            Record::Transaction(r) => &r.id,
            Record::Asset(r) => &r.id,
            Record::Budget(r) => &r.id,
            Record::Reminder(r) => &r.id,
        }
    }

    pub fn space_id(&self) -> &str {
        match self {
            Record::Transaction(r) => &r.space_id,
            Record::Asset(r) => &r.space_id,
            Record::Budget(r) => &r.space_id,
            Record::Reminder(r) => &r.space_id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Transaction(_) => EntityKind::Transaction,
            Record::Asset(_) => EntityKind::Asset,
            Record::Budget(_) => EntityKind::Budget,
            Record::Reminder(_) => EntityKind::Reminder,
        }
    }

    /// Serialized content of the record, without any sync envelope.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let value = match self {
            Record::Transaction(r) => serde_json::to_value(r)?,
            Record::Asset(r) => serde_json::to_value(r)?,
            Record::Budget(r) => serde_json::to_value(r)?,
            Record::Reminder(r) => serde_json::to_value(r)?,
        };
        Ok(value)
    }

    pub fn from_json(kind: EntityKind, value: serde_json::Value) -> Result<Self> {
        let record = match kind {
            EntityKind::Transaction => Record::Transaction(serde_json::from_value(value)?),
            EntityKind::Asset => Record::Asset(serde_json::from_value(value)?),
            EntityKind::Budget => Record::Budget(serde_json::from_value(value)?),
            EntityKind::Reminder => Record::Reminder(serde_json::from_value(value)?),
        };
        Ok(record)
    }
}

/// Typed view over one entity collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;
    fn space_id(&self) -> &str;
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Option<Self>;
}

macro_rules! impl_entity {
    ($ty:ident, $kind:ident) => {
        impl Entity for $ty {
            const KIND: EntityKind = EntityKind::$kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn space_id(&self) -> &str {
                &self.space_id
            }

            fn into_record(self) -> Record {
                Record::$kind(self)
            }

            fn from_record(record: Record) -> Option<Self> {
                match record {
                    Record::$kind(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Record {
            fn from(value: $ty) -> Self {
                Record::$kind(value)
            }
        }
    };
}

impl_entity!(Transaction, Transaction);
impl_entity!(Asset, Asset);
impl_entity!(Budget, Budget);
impl_entity!(Reminder, Reminder);

/// Every collection plus settings, used by backup-restore and export flows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub budgets: Vec<Budget>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    #[serde(default)]
    pub settings: Option<Settings>,
}

impl AppData {
    pub fn records(&self, kind: EntityKind) -> Vec<Record> {
        match kind {
            EntityKind::Transaction => self.transactions.iter().cloned().map(Record::from).collect(),
            EntityKind::Asset => self.assets.iter().cloned().map(Record::from).collect(),
            EntityKind::Budget => self.budgets.iter().cloned().map(Record::from).collect(),
            EntityKind::Reminder => self.reminders.iter().cloned().map(Record::from).collect(),
        }
    }

    /// Replaces one collection with the given records. Records of another kind are ignored.
    pub fn set_records(&mut self, kind: EntityKind, records: Vec<Record>) {
        match kind {
            EntityKind::Transaction => {
                self.transactions = records.into_iter().filter_map(Transaction::from_record).collect()
            }
            EntityKind::Asset => {
                self.assets = records.into_iter().filter_map(Asset::from_record).collect()
            }
            EntityKind::Budget => {
                self.budgets = records.into_iter().filter_map(Budget::from_record).collect()
            }
            EntityKind::Reminder => {
                self.reminders = records.into_iter().filter_map(Reminder::from_record).collect()
            }
        }
    }

    pub fn record_count(&self) -> usize {
        self.transactions.len() + self.assets.len() + self.budgets.len() + self.reminders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_asset() -> Asset {
        Asset {
            id: "asset-1".to_string(),
            name: "Savings".to_string(),
            kind: "cash".to_string(),
            value: dec!(5000),
            quantity: None,
            price_per_unit: None,
            currency: Some("USD".to_string()),
            bucket: AssetBucket::Cash,
            last_updated: None,
            space_id: "personal".to_string(),
            extra: Default::default(),
        }
    }

    #[test]
    fn record_round_trips_through_json_with_its_kind() {
        let record = Record::from(sample_asset());
        let value = record.to_json().expect("to json");
        let parsed = Record::from_json(EntityKind::Asset, value).expect("from json");
        assert_eq!(parsed, record);
        assert_eq!(parsed.kind(), EntityKind::Asset);
        assert_eq!(parsed.space_id(), "personal");
    }

    #[test]
    fn entity_from_record_rejects_other_kinds() {
        let record = Record::from(sample_asset());
        assert!(Transaction::from_record(record.clone()).is_none());
        assert_eq!(Asset::from_record(record).map(|a| a.id), Some("asset-1".to_string()));
    }

    #[test]
    fn sync_entity_collection_names_match_layout() {
        let names = EntityKind::ALL
            .iter()
            .map(|k| k.collection_name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["transactions", "assets", "budgets", "reminders"]);
    }

    #[test]
    fn app_data_set_records_replaces_one_collection() {
        let mut data = AppData::default();
        data.set_records(EntityKind::Asset, vec![Record::from(sample_asset())]);
        assert_eq!(data.assets.len(), 1);
        assert_eq!(data.records(EntityKind::Asset).len(), 1);
        assert_eq!(data.record_count(), 1);
    }
}
