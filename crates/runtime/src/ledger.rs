//! Thin mutation API used by the presentation layer.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use finsync_core::model::{AppData, Entity, EntityKind, Settings, Space};
use finsync_core::storage::{StorageAdapter, StorageAdapterExt};
use finsync_core::{Error, Result};

/// Outcome of removing a space and everything tagged with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub deleted: usize,
    /// Deletes applied locally that did not reach the cloud.
    pub not_backed_up: usize,
}

pub struct Ledger {
    adapter: Arc<dyn StorageAdapter>,
}

impl Ledger {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub async fn add<T: Entity>(&self, entity: T) -> Result<()> {
        self.adapter.create_entity(entity).await
    }

    pub async fn update<T: Entity>(&self, entity: T) -> Result<()> {
        self.adapter.update_entity(entity).await
    }

    pub async fn remove<T: Entity>(&self, id: &str) -> Result<()> {
        self.adapter.delete_of::<T>(id).await
    }

    pub async fn get<T: Entity>(&self, id: &str) -> Result<Option<T>> {
        self.adapter.get_of::<T>(id).await
    }

    /// Lists every `T`, or only those in `space_id` when given.
    pub async fn list<T: Entity>(&self, space_id: Option<&str>) -> Result<Vec<T>> {
        let all = self.adapter.get_all_of::<T>().await?;
        Ok(match space_id {
            Some(space_id) => all.into_iter().filter(|e| e.space_id() == space_id).collect(),
            None => all,
        })
    }

    /// Stored settings, or defaults when none have been saved yet.
    pub async fn settings(&self) -> Result<Settings> {
        Ok(self.adapter.get_settings().await?.unwrap_or_default())
    }

    /// Applies `edit` to the current settings and saves the whole document.
    pub async fn update_settings<F>(&self, edit: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings) + Send,
    {
        let mut settings = self.settings().await?;
        edit(&mut settings);
        self.adapter.save_settings(settings.clone()).await?;
        Ok(settings)
    }

    pub async fn add_space(&self, name: &str) -> Result<Space> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_operation("Space name must not be empty"));
        }

        let space = Space::new(Uuid::new_v4().to_string(), name);
        let created = space.clone();
        self.update_settings(move |settings| settings.spaces.push(space))
            .await?;
        info!("[Ledger] Added space {} ({})", created.name, created.id);
        Ok(created)
    }

    /// Deletes every record tagged with `space_id`, then drops the space from
    /// settings. Records in other spaces are never touched.
    ///
    /// Deletes that only reached the local replica are counted in
    /// `not_backed_up` instead of failing the cascade.
    pub async fn delete_space(&self, space_id: &str) -> Result<CascadeReport> {
        let mut settings = self.settings().await?;
        if settings.space(space_id).is_some() && settings.spaces.len() == 1 {
            return Err(Error::invalid_operation("Cannot delete the only space"));
        }

        let mut report = CascadeReport::default();
        for kind in EntityKind::ALL {
            let doomed = self
                .adapter
                .get_all(kind)
                .await?
                .into_iter()
                .filter(|record| record.space_id() == space_id)
                .map(|record| record.id().to_string())
                .collect::<Vec<_>>();

            for id in doomed {
                match self.adapter.delete(kind, &id).await {
                    Ok(()) => report.deleted += 1,
                    Err(err) if err.is_locally_persisted() => {
                        warn!("[Ledger] {} {} deleted locally only: {}", kind, id, err);
                        report.deleted += 1;
                        report.not_backed_up += 1;
                    }
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
            }
        }

        settings.spaces.retain(|space| space.id != space_id);
        if settings.active_space == space_id {
            if let Some(first) = settings.spaces.first() {
                settings.active_space = first.id.clone();
            }
        }
        match self.adapter.save_settings(settings).await {
            Ok(()) => {}
            Err(err) if err.is_locally_persisted() => {
                warn!("[Ledger] Settings saved locally only after deleting space {}: {}", space_id, err);
            }
            Err(err) => return Err(err),
        }

        info!(
            "[Ledger] Deleted space {}: {} records removed, {} not backed up",
            space_id, report.deleted, report.not_backed_up
        );
        Ok(report)
    }

    pub async fn export(&self) -> Result<AppData> {
        self.adapter.export_data().await
    }

    pub async fn import(&self, data: AppData) -> Result<()> {
        self.adapter.import_data(data).await
    }

    pub async fn sync_now(&self) -> Result<()> {
        self.adapter.sync_now().await
    }

    pub async fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.adapter.get_last_sync_time().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_cloud::{CloudStorageAdapter, DocumentStore, MemoryDocumentStore};
    use finsync_core::auth::StaticSessionProvider;
    use finsync_core::model::{Asset, AssetBucket, Transaction, TransactionType};
    use finsync_storage_local::{LocalStorageAdapter, MemoryKvStore};
    use finsync_sync::HybridAdapter;
    use rust_decimal_macros::dec;

    fn transaction(id: &str, space_id: &str) -> Transaction {
        Transaction {
            id: id.to_string(),
            date: "2024-03-01".to_string(),
            amount: dec!(125000),
            kind: TransactionType::Expense,
            category: "Food & Dining".to_string(),
            description: "Lunch".to_string(),
            note: None,
            space_id: space_id.to_string(),
            extra: Default::default(),
        }
    }

    fn asset(id: &str, space_id: &str) -> Asset {
        Asset {
            id: id.to_string(),
            name: "Savings".to_string(),
            kind: "savings".to_string(),
            value: dec!(10000000),
            quantity: None,
            price_per_unit: None,
            currency: None,
            bucket: AssetBucket::Cash,
            last_updated: None,
            space_id: space_id.to_string(),
            extra: Default::default(),
        }
    }

    async fn local_ledger() -> Ledger {
        let adapter = LocalStorageAdapter::new(Arc::new(MemoryKvStore::new()));
        adapter.initialize().await.expect("init");
        Ledger::new(Arc::new(adapter))
    }

    #[tokio::test]
    async fn list_filters_by_space() {
        let ledger = local_ledger().await;
        ledger.add(transaction("t1", "personal")).await.expect("t1");
        ledger.add(transaction("t2", "family")).await.expect("t2");

        let family = ledger
            .list::<Transaction>(Some("family"))
            .await
            .expect("list");
        let all = ledger.list::<Transaction>(None).await.expect("list all");

        assert_eq!(family.len(), 1);
        assert_eq!(family[0].id, "t2");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn delete_space_cascades_only_within_the_partition() {
        let ledger = local_ledger().await;
        ledger.add(transaction("t1", "personal")).await.expect("t1");
        ledger.add(transaction("t2", "family")).await.expect("t2");
        ledger.add(asset("a1", "family")).await.expect("a1");
        ledger.add(asset("a2", "personal")).await.expect("a2");
        ledger
            .update_settings(|s| s.active_space = "family".to_string())
            .await
            .expect("settings");

        let report = ledger.delete_space("family").await.expect("cascade");

        assert_eq!(
            report,
            CascadeReport {
                deleted: 2,
                not_backed_up: 0
            }
        );
        let remaining = ledger.list::<Transaction>(None).await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].space_id, "personal");
        assert_eq!(ledger.list::<Asset>(None).await.expect("assets").len(), 1);

        let settings = ledger.settings().await.expect("settings");
        assert!(settings.space("family").is_none());
        assert_eq!(settings.active_space, "personal");
    }

    #[tokio::test]
    async fn only_space_cannot_be_deleted() {
        let ledger = local_ledger().await;
        ledger
            .update_settings(|s| s.spaces.retain(|space| space.id == "personal"))
            .await
            .expect("settings");

        let err = ledger.delete_space("personal").await.expect_err("only space");
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(ledger.settings().await.expect("settings").space("personal").is_some());
    }

    #[tokio::test]
    async fn add_space_appends_to_settings() {
        let ledger = local_ledger().await;
        let space = ledger.add_space("  Business ").await.expect("add");

        let settings = ledger.settings().await.expect("settings");
        assert_eq!(space.name, "Business");
        assert_eq!(settings.space(&space.id), Some(&space));
        let err = ledger.add_space("   ").await.expect_err("blank name");
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn offline_cascade_counts_records_not_backed_up() {
        let documents = Arc::new(MemoryDocumentStore::new());
        let store: Arc<dyn DocumentStore> = documents.clone();
        let local = Arc::new(LocalStorageAdapter::new(Arc::new(MemoryKvStore::new())));
        let cloud = Arc::new(CloudStorageAdapter::new(
            Some(store),
            Arc::new(StaticSessionProvider::signed_in("user-1", "token")),
            "device-1",
        ));
        let hybrid = HybridAdapter::new(local, cloud);
        hybrid.initialize().await.expect("init");
        let ledger = Ledger::new(Arc::new(hybrid));

        ledger.add(transaction("t1", "family")).await.expect("t1");
        ledger.add(transaction("t2", "personal")).await.expect("t2");
        documents.set_online(false);

        let report = ledger.delete_space("family").await.expect("cascade");

        assert_eq!(report.deleted, 1);
        assert_eq!(report.not_backed_up, 1);
        let remaining = ledger.list::<Transaction>(None).await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "t2");
    }
}
