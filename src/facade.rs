//! Remote-first access with local fallback
//!
//! Writes try the remote store and fall back to the staging store on any
//! failure, or straight away while known offline. A staged write queues a
//! sync request and returns a placeholder carrying the local id; it never
//! fails because of connectivity. Reads fall back to cached remote records
//! merged with staged ones.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use crate::connectivity::ConnectivityMonitor;
use crate::error::{FieldSyncError, Result};
use crate::remote::{bounded, RemoteEntityClient, RemoteFilter, RemoteRecord};
use crate::storage::{RemoteCache, StagingStore};
use crate::sync::{SyncHandle, SyncOrchestrator, SyncTrigger};
use crate::types::{
    ArrivalAlertPayload, EmergencyPayload, EntityKind, EntityRecord, LogPayload, ProfilePayload,
    RecordId, Stageable,
};

/// The entry point screens and controllers call
pub struct ResilientAccess {
    remote: Arc<dyn RemoteEntityClient>,
    staging: StagingStore,
    cache: RemoteCache,
    monitor: ConnectivityMonitor,
    sync: SyncHandle,
    remote_timeout_ms: u64,
}

impl ResilientAccess {
    pub fn new(
        remote: Arc<dyn RemoteEntityClient>,
        staging: StagingStore,
        monitor: ConnectivityMonitor,
        orchestrator: &SyncOrchestrator,
    ) -> Self {
        let cache = RemoteCache::new(staging.storage().clone());
        Self {
            remote,
            staging,
            cache,
            monitor,
            sync: orchestrator.handle(),
            remote_timeout_ms: orchestrator.config().remote_timeout_ms,
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn create_log_resilient(&self, log: LogPayload) -> Result<EntityRecord<LogPayload>> {
        self.create_resilient(log).await
    }

    pub async fn create_profile_resilient(
        &self,
        profile: ProfilePayload,
    ) -> Result<EntityRecord<ProfilePayload>> {
        self.create_resilient(profile).await
    }

    pub async fn create_emergency_resilient(
        &self,
        emergency: EmergencyPayload,
    ) -> Result<EntityRecord<EmergencyPayload>> {
        self.create_resilient(emergency).await
    }

    pub async fn create_arrival_alert_resilient(
        &self,
        alert: ArrivalAlertPayload,
    ) -> Result<EntityRecord<ArrivalAlertPayload>> {
        self.create_resilient(alert).await
    }

    /// Create a record remotely, or stage it locally if that is not possible.
    ///
    /// Only validation and local storage failures are returned as errors.
    pub async fn create_resilient<P: Stageable>(&self, payload: P) -> Result<EntityRecord<P>> {
        payload.validate()?;

        if self.monitor.is_online() {
            match self.remote_create(&payload).await {
                Ok(record) => return Ok(record),
                Err(e) => {
                    tracing::warn!(
                        entity = %P::KIND,
                        "Failed to create record online, saving locally: {}",
                        e
                    );
                }
            }
        } else {
            tracing::info!(entity = %P::KIND, "Offline, saving record locally for sync");
        }

        let local_id = self.staging.stage(&payload).map_err(|e| {
            tracing::error!(entity = %P::KIND, "Could not stage record: {}", e);
            e
        })?;

        self.sync.request(SyncTrigger::StagedWrite);

        Ok(EntityRecord {
            id: RecordId::Local(local_id),
            payload,
        })
    }

    async fn remote_create<P: Stageable>(&self, payload: &P) -> Result<EntityRecord<P>> {
        let value = serde_json::to_value(payload)?;
        let record = bounded(self.remote_timeout_ms, self.remote.create(P::KIND, value)).await?;

        let created = record.decode::<P>().unwrap_or_else(|e| {
            tracing::debug!(entity = %P::KIND, "Remote echo did not decode, keeping input: {}", e);
            payload.clone()
        });
        self.cache_quietly(P::KIND, &record, created.owner_id());

        Ok(EntityRecord {
            id: RecordId::Remote(record.id),
            payload: created,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Logs, optionally for one user
    pub async fn get_logs_resilient(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<EntityRecord<LogPayload>>> {
        let filter = match user_id {
            Some(user_id) => RemoteFilter::for_user(user_id),
            None => RemoteFilter::all(),
        };
        self.get_resilient(&filter).await
    }

    /// A user's profile; falls back to local data when the remote has none
    pub async fn get_profile_resilient(
        &self,
        user_id: &str,
    ) -> Result<Option<EntityRecord<ProfilePayload>>> {
        let filter = RemoteFilter::for_user(user_id);
        let mut records = self.get_resilient(&filter).await?;
        if records.is_empty() {
            records = self.local_view(&filter)?;
        }
        Ok(records.into_iter().next())
    }

    /// Emergencies not yet received by an administrator
    pub async fn get_pending_emergencies_resilient(
        &self,
    ) -> Result<Vec<EntityRecord<EmergencyPayload>>> {
        self.get_resilient(&RemoteFilter::all().eq("received", false))
            .await
    }

    /// Arrival alerts not yet accepted
    pub async fn get_pending_arrival_alerts_resilient(
        &self,
    ) -> Result<Vec<EntityRecord<ArrivalAlertPayload>>> {
        self.get_resilient(&RemoteFilter::all().eq("accepted", false))
            .await
    }

    /// Read from the remote store, caching the result, or fall back to local data
    pub async fn get_resilient<P: Stageable>(
        &self,
        filter: &RemoteFilter,
    ) -> Result<Vec<EntityRecord<P>>> {
        if self.monitor.is_online() {
            match bounded(self.remote_timeout_ms, self.remote.select(P::KIND, filter)).await {
                Ok(records) => return Ok(self.accept_remote(records)),
                Err(e) => {
                    tracing::warn!(
                        entity = %P::KIND,
                        "Failed to read from remote, using local fallback: {}",
                        e
                    );
                }
            }
        }

        self.local_view(filter)
    }

    fn accept_remote<P: Stageable>(&self, records: Vec<RemoteRecord>) -> Vec<EntityRecord<P>> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let payload: P = match record.decode() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(entity = %P::KIND, remote_id = %record.id, "Skipping undecodable remote record: {}", e);
                    continue;
                }
            };
            self.cache_quietly(P::KIND, &record, payload.owner_id());
            out.push(EntityRecord {
                id: RecordId::Remote(record.id),
                payload,
            });
        }
        out
    }

    /// Cached remote records merged with staged ones.
    ///
    /// A staged row whose `server_id` is already cached is left out, so a
    /// synced record shows up once.
    pub fn local_view<P: Stageable>(&self, filter: &RemoteFilter) -> Result<Vec<EntityRecord<P>>> {
        let user_id = filter.user_id.as_deref();
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for cached in self.cache.list(P::KIND, user_id)? {
            if !filter.matches(P::KIND, &cached.payload) {
                continue;
            }
            let payload: P = serde_json::from_value(cached.payload)?;
            seen.insert(cached.remote_id.clone());
            out.push(EntityRecord {
                id: RecordId::Remote(cached.remote_id),
                payload,
            });
        }

        for row in self.staging.list_all::<P>(user_id)? {
            if let Some(server_id) = &row.server_id {
                if seen.contains(server_id) {
                    continue;
                }
            }
            if !filter.matches(P::KIND, &serde_json::to_value(&row.payload)?) {
                continue;
            }
            let id = match row.server_id {
                Some(server_id) if row.synced => RecordId::Remote(server_id),
                _ => RecordId::Local(row.local_id),
            };
            out.push(EntityRecord {
                id,
                payload: row.payload,
            });
        }

        Ok(out)
    }

    // =========================================================================
    // Online-only mutations
    // =========================================================================

    pub async fn update_log(
        &self,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<EntityRecord<LogPayload>> {
        self.update_online(id, patch).await
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        patch: serde_json::Value,
    ) -> Result<EntityRecord<ProfilePayload>> {
        self.update_online(user_id, patch).await
    }

    pub async fn accept_arrival_alert(&self, id: &str) -> Result<EntityRecord<ArrivalAlertPayload>> {
        self.update_online(id, json!({ "accepted": true })).await
    }

    pub async fn accept_emergency(&self, id: &str) -> Result<EntityRecord<EmergencyPayload>> {
        self.update_online(id, json!({ "received": true })).await
    }

    /// Updates are never staged; they need the remote store
    async fn update_online<P: Stageable>(
        &self,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<EntityRecord<P>> {
        if !self.monitor.is_online() {
            return Err(FieldSyncError::Offline);
        }

        let record = bounded(
            self.remote_timeout_ms,
            self.remote.update(P::KIND, id, patch),
        )
        .await
        .map_err(|e| {
            tracing::warn!(entity = %P::KIND, remote_id = id, "Remote update failed: {}", e);
            e
        })?;

        let payload: P = record.decode()?;
        self.cache_quietly(P::KIND, &record, payload.owner_id());

        Ok(EntityRecord {
            id: RecordId::Remote(record.id),
            payload,
        })
    }

    fn cache_quietly(&self, kind: EntityKind, record: &RemoteRecord, owner: Option<&str>) {
        if let Err(e) = self.cache.put(kind, &record.id, owner, &record.fields) {
            tracing::warn!(entity = %kind, remote_id = %record.id, "Could not cache remote record: {}", e);
        }
    }
}
