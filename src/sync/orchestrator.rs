//! Sync pass engine

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use super::worker::{self, SyncHandle, WorkerHandle};
use super::{SkipReason, SyncEvent, SyncOutcome, SyncTrigger};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{FieldSyncError, Result};
use crate::remote::{bounded, RemoteEntityClient};
use crate::storage::{RawPendingRecord, StagingStore};
use crate::types::{
    EntityKind, EntityStats, LocalId, PendingCounts, StagedPayload, SyncConfig, SyncStats,
    SyncStatus,
};

type RecordKey = (EntityKind, LocalId);

/// Resets the in-flight flag when a pass ends, however it ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns all sync state: the in-flight flag, retry counters and pass stats.
///
/// Construct once at process start and share the `Arc`. Retry counters live
/// in memory only, so a restart gives every pending record a fresh budget.
pub struct SyncOrchestrator {
    staging: StagingStore,
    remote: Arc<dyn RemoteEntityClient>,
    monitor: ConnectivityMonitor,
    config: SyncConfig,
    is_syncing: AtomicBool,
    retries: Mutex<HashMap<RecordKey, u32>>,
    stats: Mutex<SyncStats>,
    events: broadcast::Sender<SyncEvent>,
    requests: mpsc::Sender<SyncTrigger>,
    pub(crate) request_rx: tokio::sync::Mutex<mpsc::Receiver<SyncTrigger>>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl SyncOrchestrator {
    pub fn new(
        staging: StagingStore,
        remote: Arc<dyn RemoteEntityClient>,
        monitor: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let (requests, request_rx) = mpsc::channel(config.queue_capacity);
        let (events, _) = broadcast::channel(64);

        Ok(Arc::new(Self {
            staging,
            remote,
            monitor,
            config,
            is_syncing: AtomicBool::new(false),
            retries: Mutex::new(HashMap::new()),
            stats: Mutex::new(SyncStats::default()),
            events,
            requests,
            request_rx: tokio::sync::Mutex::new(request_rx),
            worker: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fire-and-forget requester for write paths
    pub fn handle(&self) -> SyncHandle {
        SyncHandle::new(self.requests.clone())
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the background worker. Idempotent.
    ///
    /// Runs one pass right away, then one per interval, plus an extra pass on
    /// every offline-to-online transition. Must be called inside a Tokio
    /// runtime.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            tracing::info!("Sync manager already running");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            "Starting background sync manager"
        );

        let reconnect = self.handle();
        let subscription = self.monitor.on_change(move |online| {
            if online {
                tracing::info!("Connection restored, triggering sync");
                reconnect.request(SyncTrigger::Reconnect);
            } else {
                tracing::info!("Connection lost, staging writes locally");
            }
        });

        *worker = Some(worker::spawn(self.clone(), subscription));
    }

    /// Stop the background worker. Idempotent.
    ///
    /// Cancels the timer and the connectivity subscription. A pass already
    /// in flight still runs to completion.
    pub fn stop(&self) {
        match self.worker.lock().take() {
            Some(handle) => {
                tracing::info!("Stopping background sync manager");
                handle.shutdown();
            }
            None => tracing::info!("Sync manager not running"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            is_running: self.is_running(),
            is_syncing: self.is_syncing.load(Ordering::Acquire),
            stats: self.stats.lock().clone(),
        }
    }

    /// Unsynced records per entity type, including ones over their retry budget
    pub fn pending_count(&self) -> Result<PendingCounts> {
        self.staging.pending_counts()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = SyncStats::default();
        tracing::info!("Sync statistics reset");
    }

    /// Consecutive failed attempts recorded for a staged record
    pub fn retry_count(&self, kind: EntityKind, local_id: LocalId) -> u32 {
        self.retries
            .lock()
            .get(&(kind, local_id))
            .copied()
            .unwrap_or(0)
    }

    /// Records skipped by every pass until the process restarts
    pub fn exhausted_records(&self) -> Vec<(EntityKind, LocalId)> {
        let max = self.config.max_retries;
        let mut keys: Vec<RecordKey> = self
            .retries
            .lock()
            .iter()
            .filter(|(_, attempts)| **attempts >= max)
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys
    }

    // =========================================================================
    // Passes
    // =========================================================================

    /// Run one pass now and wait for it.
    ///
    /// Safe to call while the worker is running; if a pass is already in
    /// flight this returns [`SyncOutcome::AlreadyRunning`] immediately.
    pub async fn trigger_sync(&self) -> SyncOutcome {
        tracing::info!("Manually triggering sync");
        self.run_pass(SyncTrigger::Manual).await
    }

    pub(super) async fn run_pass(&self, trigger: SyncTrigger) -> SyncOutcome {
        if !self.monitor.is_online() {
            tracing::debug!(?trigger, "Offline, skipping sync");
            self.emit(SyncEvent::PassSkipped {
                trigger,
                reason: SkipReason::Offline,
            });
            return SyncOutcome::Offline;
        }

        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(?trigger, "Sync already in progress, skipping");
            self.emit(SyncEvent::PassSkipped {
                trigger,
                reason: SkipReason::AlreadyRunning,
            });
            return SyncOutcome::AlreadyRunning;
        }
        let _guard = PassGuard(&self.is_syncing);

        let started_at = Utc::now();
        self.stats.lock().last_sync_time = Some(started_at);
        self.emit(SyncEvent::PassStarted {
            trigger,
            started_at,
        });
        tracing::info!(?trigger, "Starting sync cycle");

        for kind in EntityKind::ALL {
            self.sync_kind(kind).await;
        }

        let stats = self.stats.lock().clone();
        let completed_at = Utc::now();
        tracing::info!(
            elapsed_ms = (completed_at - started_at).num_milliseconds(),
            "Sync cycle completed"
        );
        self.emit(SyncEvent::PassCompleted {
            trigger,
            stats: stats.clone(),
            completed_at,
        });

        SyncOutcome::Completed(stats)
    }

    async fn sync_kind(&self, kind: EntityKind) {
        let rows = match self.staging.pending_rows(kind) {
            Ok(rows) => rows,
            Err(e) => {
                *self.stats.lock().for_kind_mut(kind) = EntityStats::default();
                tracing::error!(entity = %kind, "Could not read staging store: {}", e);
                return;
            }
        };

        *self.stats.lock().for_kind_mut(kind) = EntityStats {
            success: 0,
            failed: 0,
            total: rows.len() as u32,
        };

        if rows.is_empty() {
            return;
        }

        tracing::info!(entity = %kind, pending = rows.len(), "Syncing pending records");

        let delay = Duration::from_millis(self.config.record_delay_ms);
        for (idx, row) in rows.iter().enumerate() {
            if idx > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.sync_record(kind, row).await;
        }

        let summary = *self.stats.lock().for_kind(kind);
        tracing::info!(
            entity = %kind,
            success = summary.success,
            failed = summary.failed,
            total = summary.total,
            "Entity sync finished"
        );
    }

    async fn sync_record(&self, kind: EntityKind, row: &RawPendingRecord) {
        let local_id = row.local_id;
        let attempts = self.retry_count(kind, local_id);
        if attempts >= self.config.max_retries {
            tracing::debug!(entity = %kind, local_id, "Retry budget exhausted, skipping");
            return;
        }

        let payload = match StagedPayload::decode(kind, row.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => return self.record_failure(kind, local_id, &e),
        };

        if let Some(key) = payload.natural_key() {
            match bounded(
                self.config.remote_timeout_ms,
                self.remote.find_equivalent(kind, &key),
            )
            .await
            {
                Ok(true) => {
                    let server_id = key.existing_id();
                    tracing::info!(
                        entity = %kind,
                        local_id,
                        "Equivalent record already exists remotely, marking as synced"
                    );
                    match self.staging.mark_synced(kind, local_id, &server_id) {
                        Ok(_) => {
                            self.record_success(kind, local_id);
                            self.emit(SyncEvent::RecordAlreadyPresent {
                                entity: kind,
                                local_id,
                                server_id,
                            });
                        }
                        Err(e) => {
                            tracing::error!(entity = %kind, local_id, "Could not mark record synced: {}", e);
                            self.record_failure(kind, local_id, &e);
                        }
                    }
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    // Unverifiable: let the create go ahead
                    tracing::warn!(
                        entity = %kind,
                        local_id,
                        "Duplicate check failed, attempting create: {}",
                        e
                    );
                }
            }
        }

        let value = match payload.to_value() {
            Ok(value) => value,
            Err(e) => return self.record_failure(kind, local_id, &e),
        };

        match bounded(self.config.remote_timeout_ms, self.remote.create(kind, value)).await {
            Ok(record) => match self.staging.mark_synced(kind, local_id, &record.id) {
                Ok(_) => {
                    tracing::info!(
                        entity = %kind,
                        local_id,
                        server_id = %record.id,
                        "Record synced"
                    );
                    self.record_success(kind, local_id);
                    self.emit(SyncEvent::RecordSynced {
                        entity: kind,
                        local_id,
                        server_id: record.id,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        entity = %kind,
                        local_id,
                        server_id = %record.id,
                        "Remote write confirmed but local mark failed: {}",
                        e
                    );
                    self.record_failure(kind, local_id, &e);
                }
            },
            Err(e) => self.record_failure(kind, local_id, &e),
        }
    }

    fn record_success(&self, kind: EntityKind, local_id: LocalId) {
        self.retries.lock().remove(&(kind, local_id));
        self.stats.lock().for_kind_mut(kind).success += 1;
    }

    fn record_failure(&self, kind: EntityKind, local_id: LocalId, error: &FieldSyncError) {
        let attempts = {
            let mut retries = self.retries.lock();
            let attempts = retries.entry((kind, local_id)).or_insert(0);
            *attempts += 1;
            *attempts
        };
        self.stats.lock().for_kind_mut(kind).failed += 1;

        let max = self.config.max_retries;
        tracing::warn!(
            entity = %kind,
            local_id,
            attempt = attempts,
            max_retries = max,
            "Failed to sync record: {}",
            error
        );
        self.emit(SyncEvent::RecordFailed {
            entity: kind,
            local_id,
            attempts,
            error: error.to_string(),
        });

        if attempts == max {
            tracing::error!(
                entity = %kind,
                local_id,
                "Max retries reached, record will not be retried until restart"
            );
            self.emit(SyncEvent::RetryBudgetExhausted {
                entity: kind,
                local_id,
            });
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
