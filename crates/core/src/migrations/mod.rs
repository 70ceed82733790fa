//! Migration engine: walks the persisted blob forward to the current schema version.
//!
//! Runs once per load, before anything reads persisted state. Steps are
//! ordered, cumulative and forward-only; each is a pure function so it can be
//! verified on its own. The output always carries `CURRENT_SCHEMA_VERSION`.

mod steps;

use log::{debug, info, warn};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::errors::{Error, Result};
use crate::model::{AppData, EntityKind, Record, Settings};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// One forward step. Applied when the stored version is below `target_version`.
pub struct MigrationStep {
    pub target_version: u32,
    pub name: &'static str,
    pub apply: fn(Value) -> Value,
}

/// Ordered by `target_version`; the last entry targets `CURRENT_SCHEMA_VERSION`.
pub const MIGRATION_STEPS: [MigrationStep; 3] = [
    MigrationStep {
        target_version: 1,
        name: "backfill_categories",
        apply: steps::backfill_categories,
    },
    MigrationStep {
        target_version: 2,
        name: "profiles_to_spaces",
        apply: steps::profiles_to_spaces,
    },
    MigrationStep {
        target_version: 3,
        name: "backfill_required_fields",
        apply: steps::backfill_required_fields,
    },
];

/// Result of walking a blob through the step chain.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOutcome {
    pub state: Value,
    pub migrated_from: u32,
    pub migrated_to: u32,
    /// Number of steps applied (0 if already current).
    pub steps_applied: u32,
}

impl MigrationOutcome {
    pub fn is_noop(&self) -> bool {
        self.steps_applied == 0 && self.migrated_from == self.migrated_to
    }
}

/// Version embedded in a blob; `0` for data written before versioning.
pub fn stored_version(blob: &Value) -> u32 {
    blob.get("version")
        .and_then(Value::as_u64)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Migrates a blob from its embedded version.
pub fn migrate(blob: Value) -> Result<MigrationOutcome> {
    let from_version = stored_version(&blob);
    migrate_from(blob, from_version)
}

/// Migrates a blob from `from_version` to `CURRENT_SCHEMA_VERSION`.
///
/// Data from a newer build is rejected and left untouched.
pub fn migrate_from(blob: Value, from_version: u32) -> Result<MigrationOutcome> {
    if from_version > CURRENT_SCHEMA_VERSION {
        return Err(Error::UnsupportedSchemaVersion {
            found: from_version,
            current: CURRENT_SCHEMA_VERSION,
        });
    }

    let mut state = match blob {
        Value::Object(_) => blob,
        _ => Value::Object(Map::new()),
    };

    let mut steps_applied = 0;
    for step in MIGRATION_STEPS.iter() {
        if from_version < step.target_version {
            debug!(
                "[Migration] Applying step '{}' (v{})",
                step.name, step.target_version
            );
            state = (step.apply)(state);
            steps_applied += 1;
        }
    }

    if let Value::Object(root) = &mut state {
        root.insert("version".to_string(), Value::from(CURRENT_SCHEMA_VERSION));
    }

    if steps_applied > 0 {
        info!(
            "[Migration] Migrated persisted state v{} -> v{} ({} steps)",
            from_version, CURRENT_SCHEMA_VERSION, steps_applied
        );
    }

    Ok(MigrationOutcome {
        state,
        migrated_from: from_version,
        migrated_to: CURRENT_SCHEMA_VERSION,
        steps_applied,
    })
}

/// The versioned envelope around every locally persisted collection.
///
/// Everything this build cannot model is carried alongside the typed data and
/// written back untouched: unknown top-level keys, entries that fail to decode
/// and a settings value that is not an object.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub version: u32,
    pub data: AppData,
    pub extra: Map<String, Value>,
    pub unreadable: HashMap<EntityKind, Vec<Value>>,
    pub unreadable_settings: Option<Value>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self::new(AppData::default())
    }
}

impl PersistedState {
    pub fn new(data: AppData) -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
            data,
            extra: Map::new(),
            unreadable: HashMap::new(),
            unreadable_settings: None,
        }
    }

    /// Decodes a migrated blob. Entries that fail to decode are kept aside
    /// rather than discarding the whole collection.
    pub fn from_migrated(state: &Value) -> Self {
        let mut persisted = Self::new(AppData::default());
        persisted.version = stored_version(state).max(CURRENT_SCHEMA_VERSION);

        let Some(root) = state.as_object() else {
            return persisted;
        };

        for (key, value) in root {
            let known = key == "version"
                || key == "settings"
                || EntityKind::ALL.iter().any(|k| k.collection_name() == key);
            if !known {
                persisted.extra.insert(key.clone(), value.clone());
            }
        }

        for kind in EntityKind::ALL {
            let Some(items) = root.get(kind.collection_name()).and_then(Value::as_array) else {
                continue;
            };
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                match Record::from_json(kind, item.clone()) {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        warn!("[Migration] Keeping undecodable {} entry as-is: {}", kind, err);
                        persisted.unreadable.entry(kind).or_default().push(item.clone());
                    }
                }
            }
            persisted.data.set_records(kind, records);
        }

        match root.get("settings") {
            None | Some(Value::Null) => {}
            Some(value) => match Settings::from_json_lenient(value.clone()) {
                Some(settings) => persisted.data.settings = Some(settings),
                None => {
                    warn!("[Migration] Keeping non-object settings as-is");
                    persisted.unreadable_settings = Some(value.clone());
                }
            },
        }

        persisted
    }

    /// The blob to persist. Kept entries whose id now belongs to a typed
    /// record are superseded by it.
    pub fn to_json(&self) -> Result<Value> {
        let mut root = self.extra.clone();
        if let Value::Object(data) = serde_json::to_value(&self.data)? {
            root.extend(data);
        }

        for (kind, kept) in &self.unreadable {
            let typed = self.data.records(*kind);
            let superseded = |item: &Value| {
                item.get("id")
                    .and_then(Value::as_str)
                    .is_some_and(|id| typed.iter().any(|r| r.id() == id))
            };
            if let Some(Value::Array(items)) = root.get_mut(kind.collection_name()) {
                items.extend(kept.iter().filter(|item| !superseded(item)).cloned());
            }
        }

        if self.data.settings.is_none() {
            if let Some(raw) = &self.unreadable_settings {
                root.insert("settings".to_string(), raw.clone());
            }
        }

        root.insert("version".to_string(), Value::from(self.version));
        Ok(Value::Object(root))
    }
}

impl Serialize for PersistedState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

/// A loaded and migrated local state.
#[derive(Debug, Clone)]
pub struct LoadedState {
    pub state: PersistedState,
    /// True when the stored blob differs from what should be written back.
    pub needs_write: bool,
}

/// Parses and migrates a raw persisted blob.
///
/// Missing, unparseable or non-object input is treated as "no prior state".
pub fn load_persisted(raw: Option<&str>) -> Result<LoadedState> {
    let Some(raw) = raw else {
        return Ok(LoadedState {
            state: PersistedState::default(),
            needs_write: false,
        });
    };

    let blob = match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            warn!("[Migration] Persisted state is not an object, starting empty");
            return Ok(LoadedState {
                state: PersistedState::default(),
                needs_write: true,
            });
        }
        Err(err) => {
            warn!("[Migration] Failed to parse persisted state, starting empty: {}", err);
            return Ok(LoadedState {
                state: PersistedState::default(),
                needs_write: true,
            });
        }
    };

    let outcome = migrate(blob)?;
    Ok(LoadedState {
        state: PersistedState::from_migrated(&outcome.state),
        needs_write: !outcome.is_noop(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legacy_blob() -> Value {
        json!({
            "version": 1,
            "transactions": [{
                "id": "tx-1",
                "date": "2025-03-01",
                "amount": 42.5,
                "type": "expense",
                "category": "Food",
                "description": "Lunch",
                "profile": "family"
            }],
            "assets": [{
                "id": "asset-1",
                "name": "Gold bar",
                "type": "Gold",
                "value": 1000,
                "profile": "personal"
            }],
            "budgets": [],
            "settings": {
                "currency": "USD",
                "theme": "dark",
                "activeProfile": "personal",
                "categories": { "expense": ["Food"], "income": ["Salary"] }
            }
        })
    }

    #[test]
    fn profile_tag_becomes_family_space_id() {
        let outcome = migrate(legacy_blob()).expect("migrate");
        assert_eq!(outcome.migrated_from, 1);
        assert_eq!(outcome.migrated_to, CURRENT_SCHEMA_VERSION);
        assert_eq!(outcome.steps_applied, 2);

        let state = PersistedState::from_migrated(&outcome.state);
        let settings = state.data.settings.expect("settings");
        let family = settings
            .spaces
            .iter()
            .find(|s| s.name == "Family")
            .expect("family space");

        let tx = &outcome.state["transactions"][0];
        assert_eq!(tx["spaceId"], Value::String(family.id.clone()));
        assert!(tx.get("profile").is_none());
        assert_eq!(state.data.transactions[0].space_id, family.id);
    }

    #[test]
    fn migration_is_idempotent() {
        let first = migrate(legacy_blob()).expect("first pass");
        let second = migrate(first.state.clone()).expect("second pass");

        assert_eq!(second.steps_applied, 0);
        assert!(second.is_noop());
        assert_eq!(second.state, first.state);
    }

    #[test]
    fn version_never_decreases() {
        for version in 0..=CURRENT_SCHEMA_VERSION {
            let mut blob = legacy_blob();
            blob["version"] = json!(version);
            let outcome = migrate(blob).expect("migrate");
            assert!(stored_version(&outcome.state) >= version);
            assert_eq!(stored_version(&outcome.state), CURRENT_SCHEMA_VERSION);
        }
    }

    #[test]
    fn unversioned_blob_runs_every_step() {
        let blob = json!({ "settings": { "currency": "EUR" } });
        let outcome = migrate(blob).expect("migrate");
        assert_eq!(outcome.migrated_from, 0);
        assert_eq!(outcome.steps_applied, MIGRATION_STEPS.len() as u32);
        assert!(outcome.state["settings"]["categories"]["expense"].is_array());
        assert_eq!(outcome.state["settings"]["activeSpace"], "personal");
    }

    #[test]
    fn newer_version_is_rejected() {
        let blob = json!({ "version": CURRENT_SCHEMA_VERSION + 1 });
        let err = migrate(blob).expect_err("newer data");
        assert!(matches!(err, Error::UnsupportedSchemaVersion { .. }));
    }

    #[test]
    fn steps_are_strictly_ordered() {
        let targets = MIGRATION_STEPS
            .iter()
            .map(|s| s.target_version)
            .collect::<Vec<_>>();
        assert!(targets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(targets.last().copied(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn corrupt_blob_loads_as_empty_state() {
        let loaded = load_persisted(Some("{not json")).expect("load");
        assert_eq!(loaded.state, PersistedState::default());
        assert!(loaded.needs_write);

        let loaded = load_persisted(None).expect("load");
        assert_eq!(loaded.state.data.record_count(), 0);
        assert!(!loaded.needs_write);
    }

    #[test]
    fn undecodable_record_is_kept_not_fatal() {
        let raw = json!({
            "version": CURRENT_SCHEMA_VERSION,
            "transactions": [
                { "id": "ok", "date": "2025-01-01", "amount": 1, "type": "income",
                  "category": "Salary", "description": "", "spaceId": "personal" },
                { "id": "broken" }
            ]
        })
        .to_string();

        let loaded = load_persisted(Some(&raw)).expect("load");
        assert_eq!(loaded.state.data.transactions.len(), 1);
        assert_eq!(loaded.state.data.transactions[0].id, "ok");
        assert!(!loaded.needs_write);

        let written = loaded.state.to_json().expect("to_json");
        let ids = written["transactions"]
            .as_array()
            .expect("array")
            .iter()
            .map(|t| t["id"].clone())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![json!("ok"), json!("broken")]);
    }

    #[test]
    fn fields_from_other_clients_survive_a_rewrite() {
        let raw = json!({
            "version": CURRENT_SCHEMA_VERSION,
            "assets": [{
                "id": "a-1", "name": "Loan to Minh", "type": "receivable", "value": 5000000,
                "bucket": "receivable", "spaceId": "personal", "lastUpdated": "2025-06-01",
                "note": "due in June"
            }],
            "settings": {
                "theme": "pink",
                "language": "vi",
                "categories": { "expense": ["Food"], "income": ["Salary"], "investment": ["Gold"] }
            },
            "monthlySummaries": [{ "id": "m-1", "month": 4, "year": 2025, "rating": 4 }],
            "investmentLogs": []
        });

        let state = PersistedState::from_migrated(&raw);
        assert_eq!(state.data.assets.len(), 1);
        let written = state.to_json().expect("to_json");

        assert_eq!(written["assets"][0]["bucket"], "receivable");
        assert_eq!(written["assets"][0]["note"], "due in June");
        assert_eq!(written["settings"]["theme"], "pink");
        assert_eq!(written["settings"]["language"], "vi");
        assert_eq!(written["settings"]["categories"]["investment"], json!(["Gold"]));
        assert_eq!(written["monthlySummaries"], raw["monthlySummaries"]);
        assert_eq!(written["investmentLogs"], json!([]));
    }

    #[test]
    fn typed_record_supersedes_kept_entry_with_same_id() {
        let raw = json!({
            "version": CURRENT_SCHEMA_VERSION,
            "budgets": [{ "id": "b-1", "amount": "lots" }]
        });
        let mut state = PersistedState::from_migrated(&raw);
        let budget: crate::model::Budget = serde_json::from_value(json!({
            "id": "b-1", "category": "Rent", "amount": 1200, "period": "month", "spaceId": "personal"
        }))
        .expect("budget");
        state.data.budgets.push(budget);

        let written = state.to_json().expect("to_json");
        let budgets = written["budgets"].as_array().expect("array");
        assert_eq!(budgets.len(), 1);
        assert_eq!(budgets[0]["category"], "Rent");
    }
}
