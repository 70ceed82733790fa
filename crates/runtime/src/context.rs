use log::{info, warn};
use std::sync::{Arc, RwLock};

use finsync_cloud::{DocumentStore, RestDocumentStore};
use finsync_core::auth::SessionProvider;
use finsync_core::model::StorageMode;
use finsync_core::storage::StorageAdapter;
use finsync_core::Result;
use finsync_storage_local::{ContextId, DeviceIdentity, KvStore};

use crate::config::StorageConfig;
use crate::factory::{BackendDependencies, BackendFactory};
use crate::ledger::Ledger;

/// Owns the storage stack for one application instance.
///
/// Constructed once at startup and passed to whatever needs storage; nothing
/// in the workspace reaches for a process-wide instance.
pub struct StorageContext {
    config: StorageConfig,
    mode: RwLock<StorageMode>,
    device: DeviceIdentity,
    factory: BackendFactory,
}

impl StorageContext {
    /// Builds the context from configuration, opening the on-disk store and the
    /// HTTP client as configured.
    pub fn from_config(config: StorageConfig, sessions: Arc<dyn SessionProvider>) -> Result<Self> {
        let kv_store = config.open_kv_store()?;
        let document_store: Option<Arc<dyn DocumentStore>> = match config.cloud.clone() {
            Some(cloud) => Some(Arc::new(RestDocumentStore::new(cloud)?)),
            None => {
                info!("[Factory] Cloud backend not configured");
                None
            }
        };
        Self::new(config, kv_store, sessions, document_store)
    }

    /// Builds the context around stores supplied by the caller.
    pub fn new(
        config: StorageConfig,
        kv_store: Arc<dyn KvStore>,
        sessions: Arc<dyn SessionProvider>,
        document_store: Option<Arc<dyn DocumentStore>>,
    ) -> Result<Self> {
        let device = DeviceIdentity::load_or_create(kv_store.as_ref(), ContextId::fresh())?;
        let factory = BackendFactory::new(BackendDependencies {
            kv_store,
            sessions,
            document_store,
            device_id: device.as_str().to_string(),
        });

        Ok(Self {
            mode: RwLock::new(config.mode),
            config,
            device,
            factory,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn device_id(&self) -> &str {
        self.device.as_str()
    }

    pub fn storage_mode(&self) -> StorageMode {
        match self.mode.read() {
            Ok(mode) => *mode,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_storage_mode(&self, mode: StorageMode) {
        match self.mode.write() {
            Ok(mut current) => *current = mode,
            Err(poisoned) => *poisoned.into_inner() = mode,
        }
    }

    /// The live backend for the current storage mode.
    pub async fn adapter(&self) -> Result<Arc<dyn StorageAdapter>> {
        self.factory.get_adapter(self.storage_mode()).await
    }

    /// Selects a new storage mode and returns its initialized backend. The
    /// previous backend is disconnected first. The choice is also written to
    /// the new backend's settings when it can be.
    pub async fn switch_mode(&self, mode: StorageMode) -> Result<Arc<dyn StorageAdapter>> {
        self.set_storage_mode(mode);
        let adapter = self.factory.get_adapter(mode).await?;

        let mut settings = adapter.get_settings().await?.unwrap_or_default();
        if settings.storage_mode != mode {
            settings.storage_mode = mode;
            if let Err(err) = adapter.save_settings(settings).await {
                if !err.is_locally_persisted() {
                    warn!("[Factory] Could not record storage mode {}: {}", mode, err);
                }
            }
        }
        Ok(adapter)
    }

    /// Copies the local replica to the cloud, replacing what the cloud holds.
    /// Returns the number of records uploaded.
    pub async fn migrate_to_cloud(&self) -> Result<usize> {
        self.factory.upload_local_to_cloud().await
    }

    /// Like [`switch_mode`](Self::switch_mode), but when leaving local mode
    /// the local data is uploaded first so the cloud-backed mode starts from
    /// it instead of an empty remote. The mode is unchanged if the upload
    /// fails.
    pub async fn switch_mode_with_upload(
        &self,
        mode: StorageMode,
    ) -> Result<Arc<dyn StorageAdapter>> {
        if self.storage_mode() == StorageMode::Local && mode != StorageMode::Local {
            self.migrate_to_cloud().await?;
        }
        self.switch_mode(mode).await
    }

    pub async fn ledger(&self) -> Result<Ledger> {
        Ok(Ledger::new(self.adapter().await?))
    }

    /// Disconnects the live backend.
    pub async fn shutdown(&self) -> Result<()> {
        self.factory.reset().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_cloud::MemoryDocumentStore;
    use finsync_core::auth::StaticSessionProvider;
    use finsync_core::model::{Transaction, TransactionType};
    use finsync_core::storage::AdapterState;
    use finsync_storage_local::{MemoryKvStore, DEVICE_ID_KEY};
    use rust_decimal_macros::dec;

    fn context(mode: StorageMode) -> (StorageContext, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        let context = StorageContext::new(
            StorageConfig {
                mode,
                ..StorageConfig::default()
            },
            kv.clone(),
            Arc::new(StaticSessionProvider::signed_in("user-1", "token")),
            Some(Arc::new(MemoryDocumentStore::new())),
        )
        .expect("context");
        (context, kv)
    }

    #[tokio::test]
    async fn device_id_is_persisted_in_the_local_store() {
        let (context, kv) = context(StorageMode::Local);
        assert_eq!(
            kv.get(DEVICE_ID_KEY).expect("get").as_deref(),
            Some(context.device_id())
        );
    }

    #[tokio::test]
    async fn switch_mode_disconnects_old_backend_and_records_choice() {
        let (context, _kv) = context(StorageMode::Local);
        let local = context.adapter().await.expect("local");

        let hybrid = context
            .switch_mode(StorageMode::Hybrid)
            .await
            .expect("hybrid");

        assert_eq!(local.state(), AdapterState::Disconnected);
        assert_eq!(context.storage_mode(), StorageMode::Hybrid);
        let settings = hybrid.get_settings().await.expect("settings").expect("some");
        assert_eq!(settings.storage_mode, StorageMode::Hybrid);
    }

    fn transaction(id: &str) -> Transaction {
        Transaction {
            id: id.to_string(),
            date: "2026-01-15".to_string(),
            amount: dec!(45000),
            kind: TransactionType::Expense,
            category: "Transport".to_string(),
            description: "Bus".to_string(),
            note: None,
            space_id: "personal".to_string(),
            extra: Default::default(),
        }
    }

    async fn local_context_with_transactions(
        documents: &Arc<MemoryDocumentStore>,
    ) -> StorageContext {
        let store: Arc<dyn DocumentStore> = documents.clone();
        let context = StorageContext::new(
            StorageConfig::default(),
            Arc::new(MemoryKvStore::new()),
            Arc::new(StaticSessionProvider::signed_in("user-1", "token")),
            Some(store),
        )
        .expect("context");
        let ledger = context.ledger().await.expect("ledger");
        for id in ["t1", "t2", "t3"] {
            ledger.add(transaction(id)).await.expect("add");
        }
        context
    }

    #[tokio::test]
    async fn switching_to_hybrid_with_upload_keeps_local_data() {
        let documents = Arc::new(MemoryDocumentStore::new());
        let context = local_context_with_transactions(&documents).await;

        context
            .switch_mode_with_upload(StorageMode::Hybrid)
            .await
            .expect("hybrid");

        let ledger = context.ledger().await.expect("ledger");
        let local = ledger.list::<Transaction>(None).await.expect("list");
        assert_eq!(local.len(), 3);
        assert_eq!(context.storage_mode(), StorageMode::Hybrid);
    }

    #[tokio::test]
    async fn failed_upload_leaves_mode_and_data_alone() {
        let documents = Arc::new(MemoryDocumentStore::new());
        let context = local_context_with_transactions(&documents).await;
        documents.set_online(false);

        let err = context
            .switch_mode_with_upload(StorageMode::Hybrid)
            .await
            .err()
            .expect("offline");

        assert!(err.is_offline());
        assert_eq!(context.storage_mode(), StorageMode::Local);
        let ledger = context.ledger().await.expect("ledger");
        assert_eq!(ledger.list::<Transaction>(None).await.expect("list").len(), 3);
    }

    #[tokio::test]
    async fn shutdown_releases_backend() {
        let (context, _kv) = context(StorageMode::Local);
        let adapter = context.adapter().await.expect("adapter");

        context.shutdown().await.expect("shutdown");

        assert_eq!(adapter.state(), AdapterState::Disconnected);
    }

    #[tokio::test]
    async fn from_config_without_data_dir_runs_in_memory() {
        let context = StorageContext::from_config(
            StorageConfig::default(),
            Arc::new(StaticSessionProvider::default()),
        )
        .expect("context");

        let adapter = context.adapter().await.expect("adapter");
        assert_eq!(adapter.name(), "local");
    }
}
