//! Offline read cache of records fetched from or written to the remote store

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::Storage;
use crate::error::{FieldSyncError, Result};
use crate::types::EntityKind;

/// A remote record as last seen while online
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub remote_id: String,
    pub payload: serde_json::Value,
    pub cached_at: DateTime<Utc>,
}

/// Cache keyed by (entity kind, remote id)
#[derive(Clone)]
pub struct RemoteCache {
    storage: Storage,
}

impl RemoteCache {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Insert or refresh a cached record
    pub fn put(
        &self,
        kind: EntityKind,
        remote_id: &str,
        user_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.storage.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO remote_cache (entity, remote_id, user_id, payload, cached_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![kind.as_str(), remote_id, user_id, payload.to_string(), now],
            )?;
            Ok(())
        })
    }

    /// Cached records of a kind, optionally restricted to one user
    pub fn list(&self, kind: EntityKind, user_id: Option<&str>) -> Result<Vec<CachedRecord>> {
        let rows = self.storage.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT remote_id, payload, cached_at FROM remote_cache
                 WHERE entity = ?1 AND (?2 IS NULL OR user_id = ?2)
                 ORDER BY cached_at ASC, remote_id ASC",
            )?;
            let rows = stmt
                .query_map(params![kind.as_str(), user_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<(String, String, String)>>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(decode).collect()
    }
}

fn decode((remote_id, payload, cached_at): (String, String, String)) -> Result<CachedRecord> {
    Ok(CachedRecord {
        remote_id,
        payload: serde_json::from_str(&payload)?,
        cached_at: DateTime::parse_from_rfc3339(&cached_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| FieldSyncError::Storage(format!("Bad cached_at '{}': {}", cached_at, e)))?,
    })
}
