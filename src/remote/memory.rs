//! In-process remote store

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RemoteEntityClient, RemoteFilter, RemoteRecord};
use crate::error::{FieldSyncError, Result};
use crate::types::{EntityKind, NaturalKey};

type CreateRule = Box<dyn Fn(EntityKind, &serde_json::Value) -> bool + Send + Sync>;

#[derive(Default)]
struct State {
    rows: BTreeMap<EntityKind, Vec<RemoteRecord>>,
    next_id: u64,
    create_calls: BTreeMap<EntityKind, usize>,
    reachable: bool,
    fail_lookups: bool,
    reject_create: Option<CreateRule>,
}

/// Remote store kept in memory, with switches for simulating failures
pub struct InMemoryRemote {
    state: Mutex<State>,
    latency: Mutex<Option<Duration>>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                reachable: true,
                ..State::default()
            }),
            latency: Mutex::new(None),
        }
    }

    /// Simulate losing or regaining the network path to the remote store
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Make every `find_equivalent` call fail
    pub fn set_fail_lookups(&self, fail: bool) {
        self.state.lock().fail_lookups = fail;
    }

    /// Reject creates for which `rule` returns true
    pub fn reject_creates_where<F>(&self, rule: F)
    where
        F: Fn(EntityKind, &serde_json::Value) -> bool + Send + Sync + 'static,
    {
        self.state.lock().reject_create = Some(Box::new(rule));
    }

    /// Delay applied to every call before it runs
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Rows currently stored for a kind
    pub fn rows(&self, kind: EntityKind) -> Vec<RemoteRecord> {
        self.state
            .lock()
            .rows
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of create calls received for a kind, successful or not
    pub fn create_calls(&self, kind: EntityKind) -> usize {
        self.state
            .lock()
            .create_calls
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn ensure_reachable(state: &State) -> Result<()> {
        if state.reachable {
            Ok(())
        } else {
            Err(FieldSyncError::Remote("remote store unreachable".to_string()))
        }
    }
}

#[async_trait]
impl RemoteEntityClient for InMemoryRemote {
    async fn create(&self, kind: EntityKind, payload: serde_json::Value) -> Result<RemoteRecord> {
        self.delay().await;
        let mut state = self.state.lock();
        *state.create_calls.entry(kind).or_insert(0) += 1;
        Self::ensure_reachable(&state)?;

        if let Some(rule) = &state.reject_create {
            if rule(kind, &payload) {
                return Err(FieldSyncError::Remote(format!(
                    "{} rejected the record",
                    kind.remote_collection()
                )));
            }
        }

        state.next_id += 1;
        let record = RemoteRecord {
            id: format!("{}-{}", kind.as_str(), state.next_id),
            fields: payload,
        };
        state.rows.entry(kind).or_default().push(record.clone());
        Ok(record)
    }

    async fn find_equivalent(&self, kind: EntityKind, key: &NaturalKey) -> Result<bool> {
        self.delay().await;
        let state = self.state.lock();
        Self::ensure_reachable(&state)?;
        if state.fail_lookups {
            return Err(FieldSyncError::Remote("lookup failed".to_string()));
        }

        Ok(state
            .rows
            .get(&kind)
            .map(|rows| rows.iter().any(|r| key.matches(&r.fields)))
            .unwrap_or(false))
    }

    async fn select(&self, kind: EntityKind, filter: &RemoteFilter) -> Result<Vec<RemoteRecord>> {
        self.delay().await;
        let state = self.state.lock();
        Self::ensure_reachable(&state)?;

        Ok(state
            .rows
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .filter(|r| filter.matches(kind, &r.fields))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<RemoteRecord> {
        self.delay().await;
        let mut state = self.state.lock();
        Self::ensure_reachable(&state)?;

        let record = state
            .rows
            .get_mut(&kind)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| FieldSyncError::NotFound(format!("{} {}", kind, id)))?;

        if let (Some(target), Some(changes)) = (record.fields.as_object_mut(), patch.as_object()) {
            for (field, value) in changes {
                target.insert(field.clone(), value.clone());
            }
        }

        Ok(record.clone())
    }
}
