//! Domain record shapes persisted by every backend.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Income,
    Expense,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    /// ISO date string, as entered by the user.
    pub date: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub space_id: String,
    /// Fields this build does not model, carried through every rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Balance-sheet grouping of an asset.
///
/// Values written by other clients that this build does not know are kept
/// verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssetBucket {
    Cash,
    Investment,
    Receivable,
    Payable,
    Other(String),
}

impl AssetBucket {
    pub fn as_str(&self) -> &str {
        match self {
            AssetBucket::Cash => "cash",
            AssetBucket::Investment => "investment",
            AssetBucket::Receivable => "receivable",
            AssetBucket::Payable => "payable",
            AssetBucket::Other(other) => other,
        }
    }

    /// Infers the bucket from a free-form asset type.
    pub fn from_asset_type(asset_type: &str) -> Self {
        match asset_type.to_ascii_lowercase().as_str() {
            "receivable" => AssetBucket::Receivable,
            "payable" | "loan" | "credit" => AssetBucket::Payable,
            "stock" | "bond" | "crypto" | "gold" | "investment" => AssetBucket::Investment,
            _ => AssetBucket::Cash,
        }
    }
}

impl From<String> for AssetBucket {
    fn from(value: String) -> Self {
        match value.as_str() {
            "cash" => AssetBucket::Cash,
            "investment" => AssetBucket::Investment,
            "receivable" => AssetBucket::Receivable,
            "payable" => AssetBucket::Payable,
            _ => AssetBucket::Other(value),
        }
    }
}

impl From<AssetBucket> for String {
    fn from(value: AssetBucket) -> Self {
        match value {
            AssetBucket::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for AssetBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub bucket: AssetBucket,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    pub space_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Month,
    Year,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSubItem {
    pub id: String,
    pub name: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub id: String,
    pub category: String,
    pub amount: Decimal,
    pub period: BudgetPeriod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default)]
    pub sub_items: Vec<BudgetSubItem>,
    pub space_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    Payment,
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:mm`
    pub time: String,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(rename = "type")]
    pub kind: ReminderType,
    #[serde(default)]
    pub is_completed: bool,
    pub space_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn transaction_uses_camel_case_wire_names() {
        let tx = Transaction {
            id: "tx-1".to_string(),
            date: "2026-01-15".to_string(),
            amount: dec!(125.5),
            kind: TransactionType::Expense,
            category: "Food".to_string(),
            description: "Groceries".to_string(),
            note: None,
            space_id: "personal".to_string(),
            extra: Default::default(),
        };

        let value = serde_json::to_value(&tx).expect("serialize transaction");
        assert_eq!(value["type"], "expense");
        assert_eq!(value["spaceId"], "personal");
        assert!(value.get("note").is_none());
    }

    #[test]
    fn asset_bucket_inferred_from_type() {
        assert_eq!(AssetBucket::from_asset_type("loan"), AssetBucket::Payable);
        assert_eq!(AssetBucket::from_asset_type("Stock"), AssetBucket::Investment);
        assert_eq!(AssetBucket::from_asset_type("property"), AssetBucket::Cash);
    }

    #[test]
    fn budget_defaults_missing_sub_items() {
        let budget: Budget = serde_json::from_value(serde_json::json!({
            "id": "b-1",
            "category": "Rent",
            "amount": 1200,
            "period": "month",
            "spaceId": "family"
        }))
        .expect("deserialize budget");

        assert!(budget.sub_items.is_empty());
        assert_eq!(budget.amount, dec!(1200));
        assert_eq!(budget.year, None);
    }
}
