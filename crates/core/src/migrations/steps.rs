//! Individual forward-only schema steps. Each is a pure `Value -> Value` transform.

use serde_json::{json, Map, Value};

use crate::model::{
    default_spaces, AssetBucket, Space, StorageMode, DEFAULT_CURRENCY, DEFAULT_EXPENSE_CATEGORIES,
    DEFAULT_INCOME_CATEGORIES, DEFAULT_SPACE_ID,
};

pub(super) const RECORD_COLLECTIONS: [&str; 4] = ["transactions", "assets", "budgets", "reminders"];

fn for_each_record(state: &mut Value, collection: &str, mut f: impl FnMut(&mut Map<String, Value>)) {
    if let Some(Value::Array(items)) = state.get_mut(collection) {
        for item in items.iter_mut() {
            if let Value::Object(record) = item {
                f(record);
            }
        }
    }
}

fn is_missing(map: &Map<String, Value>, key: &str) -> bool {
    matches!(map.get(key), None | Some(Value::Null))
}

fn insert_if_missing(map: &mut Map<String, Value>, key: &str, value: Value) {
    if is_missing(map, key) {
        map.insert(key.to_string(), value);
    }
}

fn default_categories() -> Value {
    json!({
        "expense": DEFAULT_EXPENSE_CATEGORIES,
        "income": DEFAULT_INCOME_CATEGORIES,
    })
}

/// v1: settings gain user-editable category lists.
pub(super) fn backfill_categories(mut state: Value) -> Value {
    let Some(settings) = state.get_mut("settings").and_then(Value::as_object_mut) else {
        return state;
    };

    match settings.get("categories").cloned() {
        None | Some(Value::Null) => {
            settings.insert("categories".to_string(), default_categories());
        }
        // Pre-versioning builds kept a flat list of expense categories.
        Some(Value::Array(expense)) => {
            settings.insert(
                "categories".to_string(),
                json!({ "expense": expense, "income": DEFAULT_INCOME_CATEGORIES }),
            );
        }
        Some(_) => {}
    }
    state
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn capitalize(name: &str) -> String {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Finds the space a legacy profile tag refers to, creating it when unknown.
fn resolve_space(spaces: &mut Vec<Space>, profile: &str) -> String {
    let wanted = profile.trim();
    if let Some(space) = spaces
        .iter()
        .find(|s| s.id == wanted || s.name.eq_ignore_ascii_case(wanted))
    {
        return space.id.clone();
    }

    let id = slugify(wanted);
    if id.is_empty() {
        return spaces
            .first()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| DEFAULT_SPACE_ID.to_string());
    }
    spaces.push(Space::new(id.clone(), capitalize(wanted)));
    id
}

/// v2: the single `profile` tag becomes a reference to a space partition.
pub(super) fn profiles_to_spaces(mut state: Value) -> Value {
    if !state.is_object() {
        state = Value::Object(Map::new());
    }

    let mut settings = match state.get("settings") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    let mut spaces: Vec<Space> = settings
        .get("spaces")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .filter(|s: &Vec<Space>| !s.is_empty())
        .unwrap_or_else(default_spaces);

    let legacy_active = settings
        .remove("activeProfile")
        .and_then(|v| v.as_str().map(str::to_string));
    let active_space = match settings.get("activeSpace").and_then(Value::as_str) {
        Some(existing) => existing.to_string(),
        None => match legacy_active {
            Some(profile) => resolve_space(&mut spaces, &profile),
            None => spaces
                .first()
                .map(|s| s.id.clone())
                .unwrap_or_else(|| DEFAULT_SPACE_ID.to_string()),
        },
    };

    for collection in RECORD_COLLECTIONS {
        for_each_record(&mut state, collection, |record| {
            let profile = record.remove("profile");
            if !is_missing(record, "spaceId") {
                return;
            }
            let space_id = match profile.as_ref().and_then(Value::as_str) {
                Some(profile) => resolve_space(&mut spaces, profile),
                None => active_space.clone(),
            };
            record.insert("spaceId".to_string(), Value::String(space_id));
        });
    }

    settings.insert("spaces".to_string(), json!(spaces));
    settings.insert("activeSpace".to_string(), Value::String(active_space));
    if let Value::Object(root) = &mut state {
        root.insert("settings".to_string(), Value::Object(settings));
    }
    state
}

/// v3: fields that became required are backfilled with their defaults.
pub(super) fn backfill_required_fields(mut state: Value) -> Value {
    for_each_record(&mut state, "transactions", |tx| {
        insert_if_missing(tx, "description", json!(""));
    });

    for_each_record(&mut state, "assets", |asset| {
        if is_missing(asset, "bucket") {
            let asset_type = asset.get("type").and_then(Value::as_str).unwrap_or_default();
            asset.insert(
                "bucket".to_string(),
                json!(AssetBucket::from_asset_type(asset_type)),
            );
        }
    });

    for_each_record(&mut state, "budgets", |budget| {
        insert_if_missing(budget, "period", json!("year"));
        insert_if_missing(budget, "subItems", json!([]));
    });

    for_each_record(&mut state, "reminders", |reminder| {
        insert_if_missing(reminder, "description", json!(""));
        insert_if_missing(reminder, "isRecurring", json!(false));
        insert_if_missing(reminder, "isCompleted", json!(false));
    });

    if let Some(settings) = state.get_mut("settings").and_then(Value::as_object_mut) {
        insert_if_missing(settings, "currency", json!(DEFAULT_CURRENCY));
        insert_if_missing(settings, "theme", json!("light"));
        insert_if_missing(settings, "budgetRules", json!({ "enforceUniqueCategory": true }));

        let mode = settings
            .get("storageMode")
            .and_then(Value::as_str)
            .map(StorageMode::from_setting)
            .unwrap_or_default();
        settings.insert("storageMode".to_string(), json!(mode));
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfill_categories_converts_flat_list() {
        let state = json!({ "settings": { "categories": ["Food"] } });
        let migrated = backfill_categories(state);
        assert_eq!(migrated["settings"]["categories"]["expense"], json!(["Food"]));
        assert!(migrated["settings"]["categories"]["income"].is_array());
    }

    #[test]
    fn backfill_categories_leaves_missing_settings_alone() {
        let state = json!({ "transactions": [] });
        assert_eq!(backfill_categories(state.clone()), state);
    }

    #[test]
    fn profiles_to_spaces_creates_unknown_space() {
        let state = json!({
            "settings": { "activeProfile": "business" },
            "assets": [{ "id": "a", "profile": "Side Business" }]
        });

        let migrated = profiles_to_spaces(state);

        assert_eq!(migrated["assets"][0]["spaceId"], "side-business");
        assert!(migrated["assets"][0].get("profile").is_none());
        assert_eq!(migrated["settings"]["activeSpace"], "business");
        let names = migrated["settings"]["spaces"]
            .as_array()
            .expect("spaces")
            .iter()
            .map(|s| s["name"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert!(names.contains(&"Side Business".to_string()));
        assert!(names.contains(&"Business".to_string()));
    }

    #[test]
    fn profiles_to_spaces_tags_untagged_records_with_active_space() {
        let state = json!({
            "settings": { "activeProfile": "family" },
            "budgets": [{ "id": "b" }]
        });

        let migrated = profiles_to_spaces(state);

        assert_eq!(migrated["budgets"][0]["spaceId"], "family");
        assert!(migrated["settings"].get("activeProfile").is_none());
    }

    #[test]
    fn backfill_required_fields_normalizes_storage_mode() {
        let state = json!({
            "settings": { "storageMode": "google-sheets" },
            "assets": [{ "id": "a", "type": "loan" }]
        });

        let migrated = backfill_required_fields(state);

        assert_eq!(migrated["settings"]["storageMode"], "local");
        assert_eq!(migrated["assets"][0]["bucket"], "payable");
        assert_eq!(migrated["settings"]["budgetRules"]["enforceUniqueCategory"], true);
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  Side  Business! "), "side-business");
        assert_eq!(slugify("***"), "");
    }
}
