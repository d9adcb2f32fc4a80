//! Remote entity API consumed by the sync layer
//!
//! The wire protocol is not owned here. Hosts implement
//! [`RemoteEntityClient`] over whatever database service they talk to;
//! [`InMemoryRemote`] is a self-contained implementation for tests and demos.

mod memory;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{FieldSyncError, Result};
use crate::types::{EntityKind, NaturalKey};

pub use memory::InMemoryRemote;

/// A row as returned by the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub fields: serde_json::Value,
}

impl RemoteRecord {
    /// Decode the remote fields into a typed payload
    pub fn decode<P: DeserializeOwned>(&self) -> Result<P> {
        Ok(serde_json::from_value(self.fields.clone())?)
    }
}

/// Equality filter understood by both the remote store and local fallbacks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteFilter {
    /// Restrict to records owned by this user
    pub user_id: Option<String>,
    /// Field name -> required value
    pub equals: BTreeMap<String, serde_json::Value>,
}

impl RemoteFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Add an equality constraint
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    /// Evaluate the filter against a payload of the given kind
    pub fn matches(&self, kind: EntityKind, fields: &serde_json::Value) -> bool {
        if let Some(user_id) = &self.user_id {
            let owner = kind
                .owner_field()
                .and_then(|field| fields.get(field))
                .and_then(|v| v.as_str());
            if owner != Some(user_id.as_str()) {
                return false;
            }
        }

        self.equals.iter().all(|(field, expected)| {
            fields.get(field).unwrap_or(&serde_json::Value::Null) == expected
        })
    }
}

/// Generic create/read/update access to the remote store
#[async_trait]
pub trait RemoteEntityClient: Send + Sync {
    /// Insert a record; fails on network or validation errors
    async fn create(&self, kind: EntityKind, payload: serde_json::Value) -> Result<RemoteRecord>;

    /// Whether a row with the same natural key already exists
    async fn find_equivalent(&self, kind: EntityKind, key: &NaturalKey) -> Result<bool>;

    /// Rows matching a filter
    async fn select(&self, kind: EntityKind, filter: &RemoteFilter) -> Result<Vec<RemoteRecord>>;

    /// Merge a patch into an existing row
    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<RemoteRecord>;
}

/// Bound a remote call by `limit_ms`; zero disables the limit
pub(crate) async fn bounded<T, F>(limit_ms: u64, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if limit_ms == 0 {
        return call.await;
    }
    match tokio::time::timeout(Duration::from_millis(limit_ms), call).await {
        Ok(result) => result,
        Err(_) => Err(FieldSyncError::Timeout(limit_ms)),
    }
}
