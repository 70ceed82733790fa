//! The single per-user settings document.

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Which backend the factory should hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Local,
    Cloud,
    Hybrid,
}

impl<'de> Deserialize<'de> for StorageMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(StorageMode::from_setting(&value))
    }
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Local => "local",
            StorageMode::Cloud => "cloud",
            StorageMode::Hybrid => "hybrid",
        }
    }

    /// Parses a persisted mode value, falling back to `Local` for anything unknown.
    pub fn from_setting(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!("Unknown storage mode '{}', falling back to local", value);
            StorageMode::Local
        })
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageMode::Local),
            "cloud" | "firebase" => Ok(StorageMode::Cloud),
            "hybrid" => Ok(StorageMode::Hybrid),
            other => Err(format!("unknown storage mode '{}'", other)),
        }
    }
}

/// UI theme. Unknown names are preserved in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Theme {
    Dark,
    #[default]
    Light,
    System,
    Pink,
    Red,
    Other(String),
}

impl Theme {
    pub fn as_str(&self) -> &str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
            Theme::System => "system",
            Theme::Pink => "pink",
            Theme::Red => "red",
            Theme::Other(other) => other,
        }
    }
}

impl From<String> for Theme {
    fn from(value: String) -> Self {
        match value.as_str() {
            "dark" => Theme::Dark,
            "light" => Theme::Light,
            "system" => Theme::System,
            "pink" => Theme::Pink,
            "red" => Theme::Red,
            _ => Theme::Other(value),
        }
    }
}

impl From<Theme> for String {
    fn from(value: Theme) -> Self {
        match value {
            Theme::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

/// A partition that records are tagged with through their `spaceId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: String,
    pub name: String,
}

impl Space {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

pub const DEFAULT_SPACE_ID: &str = "personal";

/// Spaces every fresh installation starts with.
pub fn default_spaces() -> Vec<Space> {
    vec![
        Space::new(DEFAULT_SPACE_ID, "Personal"),
        Space::new("family", "Family"),
    ]
}

pub const DEFAULT_EXPENSE_CATEGORIES: &[&str] = &[
    "Food & Dining",
    "Transportation",
    "Housing",
    "Utilities",
    "Healthcare",
    "Education",
    "Shopping",
    "Entertainment",
    "Travel",
    "Insurance",
    "Other",
];

pub const DEFAULT_INCOME_CATEGORIES: &[&str] =
    &["Salary", "Bonus", "Investment", "Business", "Gift", "Other"];

pub const DEFAULT_INVESTMENT_CATEGORIES: &[&str] =
    &["Stock", "Bond", "Fund certificate", "Gold", "Crypto"];

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|c| c.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Categories {
    #[serde(default)]
    pub expense: Vec<String>,
    #[serde(default)]
    pub income: Vec<String>,
    #[serde(default)]
    pub investment: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Categories {
    fn default() -> Self {
        Self {
            expense: owned(DEFAULT_EXPENSE_CATEGORIES),
            income: owned(DEFAULT_INCOME_CATEGORIES),
            investment: owned(DEFAULT_INVESTMENT_CATEGORIES),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetRules {
    pub enforce_unique_category: bool,
}

impl Default for BudgetRules {
    fn default() -> Self {
        Self {
            enforce_unique_category: true,
        }
    }
}

pub const DEFAULT_CURRENCY: &str = "VND";

/// User settings. Get/replace only; there is no per-field merge at the storage layer.
///
/// Fields this version does not know about are carried in `extra` so a
/// replace never drops data written by another component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub currency: String,
    pub theme: Theme,
    pub active_space: String,
    pub spaces: Vec<Space>,
    pub categories: Categories,
    pub budget_rules: BudgetRules,
    pub storage_mode: StorageMode,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY.to_string(),
            theme: Theme::default(),
            active_space: DEFAULT_SPACE_ID.to_string(),
            spaces: default_spaces(),
            categories: Categories::default(),
            budget_rules: BudgetRules::default(),
            storage_mode: StorageMode::default(),
            extra: Map::new(),
        }
    }
}

impl Settings {
    pub fn space(&self, space_id: &str) -> Option<&Space> {
        self.spaces.iter().find(|s| s.id == space_id)
    }

    /// Decodes a settings document written by any client.
    ///
    /// A field whose value cannot be read is kept verbatim in `extra`, where it
    /// shadows the defaulted field when serialized back to a JSON value.
    /// Returns `None` only when `value` is not an object.
    pub fn from_json_lenient(value: Value) -> Option<Settings> {
        let Value::Object(fields) = value else {
            return None;
        };
        if let Ok(settings) = serde_json::from_value::<Settings>(Value::Object(fields.clone())) {
            return Some(settings);
        }

        let mut readable = Map::new();
        let mut unreadable = Map::new();
        for (key, field) in fields {
            let single = Value::Object(Map::from_iter([(key.clone(), field.clone())]));
            if serde_json::from_value::<Settings>(single).is_ok() {
                readable.insert(key, field);
            } else {
                warn!("Keeping unreadable settings field '{}' as-is", key);
                unreadable.insert(key, field);
            }
        }

        let mut settings =
            serde_json::from_value::<Settings>(Value::Object(readable)).unwrap_or_default();
        settings.extra.extend(unreadable);
        Some(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_mode_accepts_legacy_firebase_value() {
        let mode: StorageMode = serde_json::from_str("\"firebase\"").expect("parse mode");
        assert_eq!(mode, StorageMode::Cloud);
        assert_eq!(StorageMode::from_setting("hybrid"), StorageMode::Hybrid);
    }

    #[test]
    fn unknown_storage_mode_falls_back_to_local() {
        assert_eq!(StorageMode::from_setting("google-sheets"), StorageMode::Local);
        let mode: StorageMode = serde_json::from_str("\"sheets\"").expect("parse mode");
        assert_eq!(mode, StorageMode::Local);
    }

    #[test]
    fn themes_from_other_clients_round_trip() {
        let settings: Settings =
            serde_json::from_value(serde_json::json!({ "theme": "pink" })).expect("pink");
        assert_eq!(settings.theme, Theme::Pink);

        let settings: Settings =
            serde_json::from_value(serde_json::json!({ "theme": "ocean" })).expect("ocean");
        assert_eq!(settings.theme, Theme::Other("ocean".to_string()));
        let value = serde_json::to_value(&settings).expect("serialize");
        assert_eq!(value["theme"], "ocean");
    }

    #[test]
    fn lenient_decode_keeps_unreadable_fields() {
        let settings = Settings::from_json_lenient(serde_json::json!({
            "currency": "USD",
            "spaces": "personal",
            "chat": { "enabled": false }
        }))
        .expect("object");

        assert_eq!(settings.currency, "USD");
        assert_eq!(settings.spaces, default_spaces());
        let value = serde_json::to_value(&settings).expect("serialize");
        assert_eq!(value["spaces"], "personal");
        assert_eq!(value["chat"]["enabled"], false);

        assert!(Settings::from_json_lenient(serde_json::json!("dark")).is_none());
    }

    #[test]
    fn partial_settings_fill_defaults_and_keep_unknown_fields() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "currency": "USD",
            "notificationsEnabled": true
        }))
        .expect("parse settings");

        assert_eq!(settings.currency, "USD");
        assert_eq!(settings.active_space, DEFAULT_SPACE_ID);
        assert_eq!(settings.spaces.len(), 2);
        assert_eq!(
            settings.extra.get("notificationsEnabled"),
            Some(&serde_json::Value::Bool(true))
        );

        let value = serde_json::to_value(&settings).expect("serialize settings");
        assert_eq!(value["notificationsEnabled"], true);
        assert_eq!(value["storageMode"], "local");
    }
}
