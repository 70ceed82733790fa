//! Pure diffing between a cloud collection and its local replica.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use finsync_core::model::Record;
use finsync_core::Result;

/// Changes that make a local collection equal to the cloud one.
///
/// Apply order: `deletes`, then `updates`, then `inserts`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionPlan {
    pub inserts: Vec<Record>,
    pub updates: Vec<Record>,
    pub deletes: Vec<String>,
}

impl CollectionPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Cloud wins on content and on membership. Content is compared on the
/// serialized domain shape; there is no field merge and no timestamp check.
///
/// A local id stored more than once is deleted and re-inserted from the cloud
/// copy, so the replica ends with exactly one record per cloud id.
pub fn plan_collection(cloud: &[Record], local: &[Record]) -> Result<CollectionPlan> {
    let mut local_by_id: HashMap<&str, Vec<&Record>> = HashMap::new();
    for record in local {
        local_by_id.entry(record.id()).or_default().push(record);
    }

    let mut plan = CollectionPlan::default();
    let mut cloud_ids: HashSet<&str> = HashSet::with_capacity(cloud.len());

    for remote in cloud {
        if !cloud_ids.insert(remote.id()) {
            continue;
        }
        match local_by_id.get(remote.id()).map(Vec::as_slice) {
            None | Some([]) => plan.inserts.push(remote.clone()),
            Some([only]) => {
                let remote_json: Value = remote.to_json()?;
                if only.to_json()? != remote_json {
                    plan.updates.push(remote.clone());
                }
            }
            Some(_) => {
                plan.deletes.push(remote.id().to_string());
                plan.inserts.push(remote.clone());
            }
        }
    }

    let mut seen_local: HashSet<&str> = HashSet::new();
    for record in local {
        let id = record.id();
        if !cloud_ids.contains(id) && seen_local.insert(id) {
            plan.deletes.push(id.to_string());
        }
    }

    Ok(plan)
}

/// Outcome of one completed reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub settings_replaced: bool,
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

impl ReconcileReport {
    pub fn total_changes(&self) -> usize {
        self.inserted + self.updated + self.deleted + usize::from(self.settings_replaced)
    }

    pub fn is_noop(&self) -> bool {
        self.total_changes() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_core::model::{Transaction, TransactionType};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn tx(id: &str, amount: Decimal) -> Record {
        Record::from(Transaction {
            id: id.to_string(),
            date: "2026-01-10".to_string(),
            amount,
            kind: TransactionType::Expense,
            category: "Transport".to_string(),
            description: String::new(),
            note: None,
            space_id: "personal".to_string(),
            extra: Default::default(),
        })
    }

    #[test]
    fn cloud_membership_and_content_win() {
        let local = vec![tx("a", dec!(1)), tx("b", dec!(2))];
        let cloud = vec![tx("a", dec!(10)), tx("c", dec!(3))];

        let plan = plan_collection(&cloud, &local).expect("plan");

        assert_eq!(plan.updates, vec![tx("a", dec!(10))]);
        assert_eq!(plan.inserts, vec![tx("c", dec!(3))]);
        assert_eq!(plan.deletes, vec!["b".to_string()]);
    }

    #[test]
    fn identical_collections_produce_empty_plan() {
        let records = vec![tx("a", dec!(1)), tx("b", dec!(2))];
        let plan = plan_collection(&records, &records).expect("plan");
        assert!(plan.is_empty());
    }

    #[test]
    fn empty_cloud_deletes_everything_local() {
        let local = vec![tx("a", dec!(1)), tx("b", dec!(2))];
        let plan = plan_collection(&[], &local).expect("plan");
        assert_eq!(plan.deletes.len(), 2);
        assert!(plan.inserts.is_empty());
    }

    #[test]
    fn local_duplicates_collapse_to_cloud_copy() {
        let local = vec![tx("a", dec!(1)), tx("a", dec!(1)), tx("z", dec!(9)), tx("z", dec!(9))];
        let cloud = vec![tx("a", dec!(1))];

        let plan = plan_collection(&cloud, &local).expect("plan");

        assert_eq!(plan.deletes, vec!["a".to_string(), "z".to_string()]);
        assert_eq!(plan.inserts, vec![tx("a", dec!(1))]);
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn report_counts_settings_replacement() {
        let report = ReconcileReport {
            inserted: 1,
            updated: 0,
            deleted: 2,
            settings_replaced: true,
            duration: Duration::from_millis(5),
            finished_at: Utc::now(),
        };
        assert_eq!(report.total_changes(), 4);
        assert!(!report.is_noop());
    }
}
