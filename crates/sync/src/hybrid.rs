//! Hybrid adapter composing a local replica and the cloud.
//!
//! Writes that reach only one side are reported as `PartialWriteFailure`
//! and are not rolled back. A record that reached local storage but never the
//! cloud is removed by the next reconciliation pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;

use finsync_core::model::{AppData, EntityKind, Record, Settings};
use finsync_core::storage::{
    callback, AdapterState, ChangeCallback, ChangeEvent, Lifecycle, Listeners, StorageAdapter,
    Subscription,
};
use finsync_core::{Error, Result, WriteSide};

use crate::reconcile::{plan_collection, CollectionPlan, ReconcileReport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Merges the two halves of a fan-out write.
fn combine_writes(local: Result<()>, cloud: Result<()>) -> Result<()> {
    match (local, cloud) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(err)) => {
            warn!("[Hybrid] Cloud write failed, kept locally: {}", err);
            Err(Error::partial(WriteSide::Cloud, err))
        }
        (Err(err), Ok(())) => {
            error!("[Hybrid] Local write failed after cloud accepted it: {}", err);
            Err(Error::partial(WriteSide::Local, err))
        }
        (Err(local_err), Err(cloud_err)) => {
            debug!("[Hybrid] Both writes failed; cloud error: {}", cloud_err);
            Err(local_err)
        }
    }
}

struct HybridInner {
    local: Arc<dyn StorageAdapter>,
    cloud: Arc<dyn StorageAdapter>,
    lifecycle: Lifecycle,
    listeners: Listeners<ChangeEvent>,
    reconcile_guard: AsyncMutex<()>,
    upstream: Mutex<Vec<Subscription>>,
    last_report: Mutex<Option<ReconcileReport>>,
}

impl HybridInner {
    /// Brings the cloud side up lazily; it may have been offline at startup.
    async fn ensure_cloud(&self) -> Result<()> {
        match self.cloud.state() {
            AdapterState::Ready => Ok(()),
            _ => self.cloud.initialize().await,
        }
    }

    async fn apply_plan(&self, kind: EntityKind, plan: CollectionPlan) -> Result<(usize, usize, usize)> {
        let mut deleted = 0;
        for id in &plan.deletes {
            match self.local.delete(kind, id).await {
                Ok(()) => deleted += 1,
                Err(err) if err.is_not_found() => {
                    debug!("[Hybrid] {} '{}' already gone locally", kind, id);
                }
                Err(err) => return Err(err),
            }
        }

        let mut updated = 0;
        for record in plan.updates {
            match self.local.update(record.clone()).await {
                Ok(()) => updated += 1,
                Err(err) if err.is_not_found() => {
                    self.local.create(record).await?;
                    updated += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let inserted = plan.inserts.len();
        for record in plan.inserts {
            self.local.create(record).await?;
        }

        Ok((inserted, updated, deleted))
    }

    /// One full pass. `None` when another pass is already running.
    async fn reconcile(&self) -> Result<Option<ReconcileReport>> {
        self.lifecycle.ensure_ready()?;
        let Ok(_pass) = self.reconcile_guard.try_lock() else {
            debug!("[Hybrid] Reconciliation already in progress, skipping");
            return Ok(None);
        };

        let started = Instant::now();
        self.ensure_cloud().await?;

        // Fetch everything before touching the replica so a network failure
        // never leaves it half-applied.
        let fetches = EntityKind::ALL.map(|kind| self.cloud.get_all(kind));
        let (cloud_collections, cloud_settings) =
            futures::try_join!(try_join_all(fetches), self.cloud.get_settings())?;

        let mut inserted = 0;
        let mut updated = 0;
        let mut deleted = 0;
        for (kind, cloud_records) in EntityKind::ALL.into_iter().zip(cloud_collections) {
            let local_records = self.local.get_all(kind).await?;
            let plan = plan_collection(&cloud_records, &local_records)?;
            if plan.is_empty() {
                continue;
            }
            let (i, u, d) = self.apply_plan(kind, plan).await?;
            debug!("[Hybrid] {}: +{} ~{} -{}", kind.collection_name(), i, u, d);
            inserted += i;
            updated += u;
            deleted += d;
        }

        let mut settings_replaced = false;
        if let Some(remote) = cloud_settings {
            if self.local.get_settings().await?.as_ref() != Some(&remote) {
                self.local.save_settings(remote).await?;
                settings_replaced = true;
            }
        }

        let report = ReconcileReport {
            inserted,
            updated,
            deleted,
            settings_replaced,
            duration: started.elapsed(),
            finished_at: Utc::now(),
        };
        info!(
            "[Hybrid] Reconciled in {:?}: {} inserted, {} updated, {} deleted, settings {}",
            report.duration,
            report.inserted,
            report.updated,
            report.deleted,
            if report.settings_replaced { "replaced" } else { "unchanged" }
        );
        *lock(&self.last_report) = Some(report.clone());
        self.listeners.emit(&ChangeEvent::Reconciled);
        Ok(Some(report))
    }

    async fn fan_out<L, C>(&self, local: L, cloud: C) -> Result<()>
    where
        L: Future<Output = Result<()>> + Send,
        C: Future<Output = Result<()>> + Send,
    {
        self.lifecycle.ensure_ready()?;
        let cloud = async {
            self.ensure_cloud().await?;
            cloud.await
        };
        let (local_result, cloud_result) = tokio::join!(local, cloud);
        combine_writes(local_result, cloud_result)
    }
}

/// Local-first adapter that keeps the replica consistent with the cloud.
#[derive(Clone)]
pub struct HybridAdapter {
    inner: Arc<HybridInner>,
}

impl HybridAdapter {
    pub fn new(local: Arc<dyn StorageAdapter>, cloud: Arc<dyn StorageAdapter>) -> Self {
        Self {
            inner: Arc::new(HybridInner {
                local,
                cloud,
                lifecycle: Lifecycle::new("hybrid"),
                listeners: Listeners::new(),
                reconcile_guard: AsyncMutex::new(()),
                upstream: Mutex::new(Vec::new()),
                last_report: Mutex::new(None),
            }),
        }
    }

    pub fn local(&self) -> &Arc<dyn StorageAdapter> {
        &self.inner.local
    }

    pub fn cloud(&self) -> &Arc<dyn StorageAdapter> {
        &self.inner.cloud
    }

    /// Runs a reconciliation pass now. Returns `None` when a pass is already running;
    /// the caller is not queued behind it.
    pub async fn reconcile(&self) -> Result<Option<ReconcileReport>> {
        self.inner.reconcile().await
    }

    pub fn last_report(&self) -> Option<ReconcileReport> {
        lock(&self.inner.last_report).clone()
    }

    fn wire_upstream(&self) -> Result<()> {
        let listeners = self.inner.listeners.clone();
        let local_sub = self
            .inner
            .local
            .on_changed(callback(move |event: &ChangeEvent| {
                if *event == ChangeEvent::ExternalWrite {
                    listeners.emit(event);
                }
            }))?;

        let weak: Weak<HybridInner> = Arc::downgrade(&self.inner);
        let cloud_sub = self
            .inner
            .cloud
            .on_changed(callback(move |event: &ChangeEvent| {
                let ChangeEvent::RemoteChange(kind) = *event else {
                    return;
                };
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    warn!("[Hybrid] Remote change in {} outside a runtime, ignored", kind);
                    return;
                };
                debug!("[Hybrid] Remote change in {}, reconciling", kind);
                handle.spawn(async move {
                    if let Err(err) = inner.reconcile().await {
                        warn!("[Hybrid] Reconciliation after remote change failed: {}", err);
                    }
                });
            }))?;

        let mut upstream = lock(&self.inner.upstream);
        upstream.clear();
        upstream.push(local_sub);
        upstream.push(cloud_sub);
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for HybridAdapter {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    /// Local must come up; the cloud may be offline. The initial
    /// reconciliation is best effort.
    async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        inner.lifecycle.ensure_not_disconnected()?;
        if inner.lifecycle.is_ready() {
            return Ok(());
        }

        self.wire_upstream()?;
        inner.local.initialize().await?;
        if let Err(err) = inner.cloud.initialize().await {
            warn!("[Hybrid] Cloud unavailable at startup, serving local data: {}", err);
        }
        inner.lifecycle.mark_ready()?;
        info!("[Hybrid] Initialized");

        if let Err(err) = inner.reconcile().await {
            warn!("[Hybrid] Initial reconciliation failed: {}", err);
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.inner.lifecycle.is_ready()
    }

    fn state(&self) -> AdapterState {
        self.inner.lifecycle.state()
    }

    async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.lifecycle.mark_disconnected() {
            return Ok(());
        }

        let upstream = std::mem::take(&mut *lock(&inner.upstream));
        drop(upstream);
        inner.listeners.clear();

        let (local, cloud) = tokio::join!(inner.local.disconnect(), inner.cloud.disconnect());
        info!("[Hybrid] Disconnected");
        local.and(cloud)
    }

    async fn get_all(&self, kind: EntityKind) -> Result<Vec<Record>> {
        self.inner.lifecycle.ensure_ready()?;
        self.inner.local.get_all(kind).await
    }

    async fn get_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        self.inner.lifecycle.ensure_ready()?;
        self.inner.local.get_by_id(kind, id).await
    }

    async fn create(&self, record: Record) -> Result<()> {
        let inner = &self.inner;
        inner
            .fan_out(inner.local.create(record.clone()), inner.cloud.create(record))
            .await
    }

    async fn update(&self, record: Record) -> Result<()> {
        let inner = &self.inner;
        inner
            .fan_out(inner.local.update(record.clone()), inner.cloud.update(record))
            .await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        let inner = &self.inner;
        inner
            .fan_out(inner.local.delete(kind, id), inner.cloud.delete(kind, id))
            .await
    }

    async fn get_settings(&self) -> Result<Option<Settings>> {
        self.inner.lifecycle.ensure_ready()?;
        self.inner.local.get_settings().await
    }

    async fn save_settings(&self, settings: Settings) -> Result<()> {
        let inner = &self.inner;
        inner
            .fan_out(
                inner.local.save_settings(settings.clone()),
                inner.cloud.save_settings(settings),
            )
            .await
    }

    /// Cloud's latest `updatedAt`; falls back to the last completed pass when
    /// the cloud cannot be asked.
    async fn get_last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let inner = &self.inner;
        inner.lifecycle.ensure_ready()?;
        let fallback = || self.last_report().map(|r| r.finished_at);

        if let Err(err) = inner.ensure_cloud().await {
            warn!("[Hybrid] Cloud unavailable for last sync time: {}", err);
            return Ok(fallback());
        }
        match inner.cloud.get_last_sync_time().await {
            Ok(Some(time)) => Ok(Some(time)),
            Ok(None) => Ok(fallback()),
            Err(err) => {
                warn!("[Hybrid] Could not read cloud sync time: {}", err);
                Ok(fallback())
            }
        }
    }

    async fn sync_now(&self) -> Result<()> {
        self.reconcile().await.map(|_| ())
    }

    fn on_changed(&self, callback: ChangeCallback) -> Result<Subscription> {
        self.inner.lifecycle.ensure_not_disconnected()?;
        Ok(self.inner.listeners.subscribe(callback))
    }

    async fn export_data(&self) -> Result<AppData> {
        self.inner.lifecycle.ensure_ready()?;
        self.inner.local.export_data().await
    }

    /// Local-only overwrite. Call `sync_now()` afterwards to pull the cloud
    /// state back over it.
    async fn import_data(&self, data: AppData) -> Result<()> {
        self.inner.lifecycle.ensure_ready()?;
        self.inner.local.import_data(data).await
    }
}
