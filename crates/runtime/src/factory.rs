//! Holds the single live storage backend.
//!
//! Switching modes disconnects the previous backend before the new one is
//! built. Callers that arrive while a backend is being initialized wait for it
//! and receive the same instance.

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

use finsync_cloud::{CloudStorageAdapter, DocumentStore};
use finsync_core::auth::SessionProvider;
use finsync_core::model::StorageMode;
use finsync_core::storage::{AdapterState, StorageAdapter};
use finsync_core::Result;
use finsync_storage_local::{KvStore, LocalStorageAdapter};
use finsync_sync::HybridAdapter;

/// Everything the factory needs to build any backend.
#[derive(Clone)]
pub struct BackendDependencies {
    pub kv_store: Arc<dyn KvStore>,
    pub sessions: Arc<dyn SessionProvider>,
    /// `None` when the cloud backend is not configured.
    pub document_store: Option<Arc<dyn DocumentStore>>,
    pub device_id: String,
}

struct ActiveBackend {
    mode: StorageMode,
    adapter: Arc<dyn StorageAdapter>,
}

pub struct BackendFactory {
    deps: BackendDependencies,
    active: Mutex<Option<ActiveBackend>>,
}

impl BackendFactory {
    pub fn new(deps: BackendDependencies) -> Self {
        Self {
            deps,
            active: Mutex::new(None),
        }
    }

    fn local(&self) -> LocalStorageAdapter {
        LocalStorageAdapter::new(Arc::clone(&self.deps.kv_store))
    }

    fn cloud(&self) -> CloudStorageAdapter {
        CloudStorageAdapter::new(
            self.deps.document_store.clone(),
            Arc::clone(&self.deps.sessions),
            self.deps.device_id.clone(),
        )
    }

    fn build(&self, mode: StorageMode) -> Arc<dyn StorageAdapter> {
        match mode {
            StorageMode::Local => Arc::new(self.local()),
            StorageMode::Cloud => Arc::new(self.cloud()),
            StorageMode::Hybrid => Arc::new(HybridAdapter::new(
                Arc::new(self.local()),
                Arc::new(self.cloud()),
            )),
        }
    }

    /// Returns the live backend for `mode`, building and initializing it on
    /// first request.
    pub async fn get_adapter(&self, mode: StorageMode) -> Result<Arc<dyn StorageAdapter>> {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if current.mode == mode && current.adapter.state() != AdapterState::Disconnected {
                return Ok(Arc::clone(&current.adapter));
            }
        }

        if let Some(previous) = active.take() {
            info!(
                "[Factory] Switching storage mode {} -> {}",
                previous.mode, mode
            );
            if let Err(err) = previous.adapter.disconnect().await {
                warn!("[Factory] Failed to disconnect {} backend: {}", previous.mode, err);
            }
        }

        let adapter = self.build(mode);
        adapter.initialize().await?;
        info!("[Factory] {} backend ready", mode);
        *active = Some(ActiveBackend {
            mode,
            adapter: Arc::clone(&adapter),
        });
        Ok(adapter)
    }

    /// Replaces the cloud copy with the local replica. Runs on throwaway
    /// adapters so the live backend is left as it is.
    pub async fn upload_local_to_cloud(&self) -> Result<usize> {
        let local = self.local();
        local.initialize().await?;
        let exported = local.export_data().await;
        release(&local).await;
        let data = exported?;
        let count = data.record_count();

        let cloud = self.cloud();
        cloud.initialize().await?;
        let uploaded = cloud.import_data(data).await;
        release(&cloud).await;
        uploaded?;

        info!("[Factory] Uploaded {} local records to the cloud", count);
        Ok(count)
    }

    pub async fn active_mode(&self) -> Option<StorageMode> {
        self.active.lock().await.as_ref().map(|a| a.mode)
    }

    /// The live backend, if any, without building one.
    pub async fn current(&self) -> Option<Arc<dyn StorageAdapter>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| Arc::clone(&a.adapter))
    }

    /// Disconnects and drops the live backend.
    pub async fn reset(&self) -> Result<()> {
        let previous = self.active.lock().await.take();
        match previous {
            Some(previous) => {
                info!("[Factory] Releasing {} backend", previous.mode);
                previous.adapter.disconnect().await
            }
            None => Ok(()),
        }
    }
}

async fn release(adapter: &dyn StorageAdapter) {
    if let Err(err) = adapter.disconnect().await {
        warn!("[Factory] Failed to disconnect {} backend: {}", adapter.name(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_cloud::MemoryDocumentStore;
    use finsync_core::auth::StaticSessionProvider;
    use finsync_core::Error;
    use finsync_storage_local::MemoryKvStore;

    fn deps(document_store: Option<Arc<dyn DocumentStore>>) -> BackendDependencies {
        BackendDependencies {
            kv_store: Arc::new(MemoryKvStore::new()),
            sessions: Arc::new(StaticSessionProvider::signed_in("user-1", "token")),
            document_store,
            device_id: "device-test".to_string(),
        }
    }

    #[tokio::test]
    async fn same_mode_returns_same_instance() {
        let factory = BackendFactory::new(deps(None));
        let first = factory.get_adapter(StorageMode::Local).await.expect("first");
        let second = factory.get_adapter(StorageMode::Local).await.expect("second");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn concurrent_requests_share_the_in_flight_instance() {
        let factory = BackendFactory::new(deps(Some(Arc::new(MemoryDocumentStore::new()))));
        let (a, b) = tokio::join!(
            factory.get_adapter(StorageMode::Hybrid),
            factory.get_adapter(StorageMode::Hybrid)
        );
        assert!(Arc::ptr_eq(&a.expect("a"), &b.expect("b")));
    }

    #[tokio::test]
    async fn switching_modes_disconnects_previous_backend() {
        let factory = BackendFactory::new(deps(Some(Arc::new(MemoryDocumentStore::new()))));
        let local = factory.get_adapter(StorageMode::Local).await.expect("local");

        let hybrid = factory.get_adapter(StorageMode::Hybrid).await.expect("hybrid");

        assert_eq!(local.state(), AdapterState::Disconnected);
        assert_eq!(hybrid.name(), "hybrid");
        assert_eq!(factory.active_mode().await, Some(StorageMode::Hybrid));
    }

    #[tokio::test]
    async fn unconfigured_cloud_fails_and_leaves_no_backend() {
        let factory = BackendFactory::new(deps(None));
        let err = factory
            .get_adapter(StorageMode::Cloud)
            .await
            .err()
            .expect("unconfigured");

        assert!(matches!(err, Error::NotAvailable(_)));
        assert!(factory.current().await.is_none());
    }

    #[tokio::test]
    async fn upload_fails_when_cloud_is_unconfigured() {
        let factory = BackendFactory::new(deps(None));
        let err = factory.upload_local_to_cloud().await.expect_err("no cloud");
        assert!(matches!(err, Error::NotAvailable(_)));
    }

    #[tokio::test]
    async fn reset_disconnects_live_backend() {
        let factory = BackendFactory::new(deps(None));
        let local = factory.get_adapter(StorageMode::Local).await.expect("local");

        factory.reset().await.expect("reset");

        assert_eq!(local.state(), AdapterState::Disconnected);
        assert_eq!(factory.active_mode().await, None);
    }
}
