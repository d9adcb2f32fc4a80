//! Local staging store for writes not yet confirmed by the remote store
//!
//! One append-only table per entity kind. Rows are never overwritten; the
//! only mutation is flipping `synced` and attaching `server_id`. Synced rows
//! stay behind as an audit trail, except logs which the caller may purge.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Storage;
use crate::error::{FieldSyncError, Result};
use crate::types::{EntityKind, LocalId, PendingCounts, PendingRecord, Stageable};

/// Raw staged row, payload still in its stored JSON form
pub type RawPendingRecord = PendingRecord<serde_json::Value>;

/// Staging store over the shared SQLite connection
#[derive(Clone)]
pub struct StagingStore {
    storage: Storage,
}

impl StagingStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Open a staging store backed by an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Storage::open_in_memory()?))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Append a new pending record and return its local id
    pub fn stage<P: Stageable>(&self, payload: &P) -> Result<LocalId> {
        let json = serde_json::to_string(payload)?;
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let table = P::KIND.staging_table();

        let local_id = self.storage.with_connection(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (user_id, payload, created_at, synced, server_id)
                     VALUES (?, ?, ?, 0, NULL)",
                    table
                ),
                params![payload.owner_id(), json, created_at],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        tracing::info!(entity = %P::KIND, local_id, "Staged record for later sync");
        Ok(local_id)
    }

    /// All unsynced rows of a kind, in staging order
    pub fn list_pending<P: Stageable>(&self) -> Result<Vec<PendingRecord<P>>> {
        self.pending_rows(P::KIND)?
            .into_iter()
            .map(decode_record)
            .collect()
    }

    /// Synced and pending rows, optionally restricted to one user
    pub fn list_all<P: Stageable>(&self, user_id: Option<&str>) -> Result<Vec<PendingRecord<P>>> {
        self.rows(P::KIND, user_id)?
            .into_iter()
            .map(decode_record)
            .collect()
    }

    /// Unsynced rows of a kind without decoding the payload
    pub fn pending_rows(&self, kind: EntityKind) -> Result<Vec<RawPendingRecord>> {
        self.storage.with_connection(|conn| {
            query_rows(
                conn,
                &format!(
                    "SELECT local_id, payload, created_at, synced, server_id FROM {}
                     WHERE synced = 0
                     ORDER BY local_id ASC",
                    kind.staging_table()
                ),
                [],
            )
        })
    }

    /// Synced and pending rows of a kind without decoding the payload
    pub fn rows(&self, kind: EntityKind, user_id: Option<&str>) -> Result<Vec<RawPendingRecord>> {
        self.storage.with_connection(|conn| {
            query_rows(
                conn,
                &format!(
                    "SELECT local_id, payload, created_at, synced, server_id FROM {}
                     WHERE (?1 IS NULL OR user_id = ?1)
                     ORDER BY local_id ASC",
                    kind.staging_table()
                ),
                params![user_id],
            )
        })
    }

    /// Fetch a single row by local id
    pub fn get(&self, kind: EntityKind, local_id: LocalId) -> Result<Option<RawPendingRecord>> {
        self.storage.with_connection(|conn| {
            let mut rows = query_rows(
                conn,
                &format!(
                    "SELECT local_id, payload, created_at, synced, server_id FROM {}
                     WHERE local_id = ?",
                    kind.staging_table()
                ),
                params![local_id],
            )?;
            Ok(rows.pop())
        })
    }

    /// Record remote confirmation for a row.
    ///
    /// Returns `false` when the row was already synced; the stored
    /// `server_id` is never replaced.
    pub fn mark_synced(&self, kind: EntityKind, local_id: LocalId, server_id: &str) -> Result<bool> {
        let table = kind.staging_table();

        self.storage.with_connection(|conn| {
            let updated = conn.execute(
                &format!(
                    "UPDATE {} SET synced = 1, server_id = ? WHERE local_id = ? AND synced = 0",
                    table
                ),
                params![server_id, local_id],
            )?;

            if updated == 1 {
                return Ok(true);
            }

            let exists: Option<i64> = conn
                .query_row(
                    &format!("SELECT local_id FROM {} WHERE local_id = ?", table),
                    params![local_id],
                    |row| row.get(0),
                )
                .optional()?;

            match exists {
                Some(_) => Ok(false),
                None => Err(FieldSyncError::NotFound(format!("{} {}", kind, local_id))),
            }
        })
    }

    /// Number of unsynced rows of a kind
    pub fn pending_count(&self, kind: EntityKind) -> Result<usize> {
        self.storage.with_connection(|conn| {
            let count: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE synced = 0",
                    kind.staging_table()
                ),
                [],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Unsynced row counts for every kind
    pub fn pending_counts(&self) -> Result<PendingCounts> {
        let mut counts = PendingCounts::default();
        for kind in EntityKind::ALL {
            counts.set(kind, self.pending_count(kind)?);
        }
        Ok(counts)
    }

    /// Delete synced log rows; other kinds keep their audit trail
    pub fn purge_synced_logs(&self) -> Result<usize> {
        let deleted = self.storage.with_connection(|conn| {
            Ok(conn.execute(
                &format!(
                    "DELETE FROM {} WHERE synced = 1",
                    EntityKind::Log.staging_table()
                ),
                [],
            )?)
        })?;

        if deleted > 0 {
            tracing::info!(deleted, "Purged synced logs from staging store");
        }
        Ok(deleted)
    }
}

fn query_rows<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<RawPendingRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, read_row)?;

    let mut records = Vec::new();
    for row in rows {
        let (local_id, payload, created_at, synced, server_id) = row?;
        records.push(PendingRecord {
            local_id,
            payload: serde_json::from_str(&payload)?,
            created_at: parse_timestamp(&created_at)?,
            synced,
            server_id,
        });
    }
    Ok(records)
}

type RowTuple = (LocalId, String, String, bool, Option<String>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RowTuple> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get::<_, i64>(3)? != 0,
        row.get(4)?,
    ))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FieldSyncError::Storage(format!("Bad created_at '{}': {}", s, e)))
}

fn decode_record<P: Stageable>(raw: RawPendingRecord) -> Result<PendingRecord<P>> {
    Ok(PendingRecord {
        local_id: raw.local_id,
        payload: serde_json::from_value(raw.payload)?,
        created_at: raw.created_at,
        synced: raw.synced,
        server_id: raw.server_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArrivalAlertPayload, LogPayload};
    use pretty_assertions::assert_eq;

    fn log(user: &str, date: &str) -> LogPayload {
        LogPayload {
            user_id: user.to_string(),
            name: "Ana".to_string(),
            log_date: date.to_string(),
            ingress_time: Some("08:00".to_string()),
            exit_time: None,
            description: None,
            image: None,
        }
    }

    #[test]
    fn test_stage_assigns_increasing_ids() {
        let store = StagingStore::open_in_memory().unwrap();
        let first = store.stage(&log("u1", "2025-01-01")).unwrap();
        let second = store.stage(&log("u1", "2025-01-02")).unwrap();
        assert!(second > first);

        let pending: Vec<PendingRecord<LogPayload>> = store.list_pending().unwrap();
        assert_eq!(
            pending.iter().map(|r| r.local_id).collect::<Vec<_>>(),
            vec![first, second]
        );
        assert!(pending.iter().all(|r| !r.synced && r.server_id.is_none()));
    }

    #[test]
    fn test_order_ignores_wall_clock() {
        let store = StagingStore::open_in_memory().unwrap();
        let first = store.stage(&log("u1", "2025-01-01")).unwrap();
        let second = store.stage(&log("u1", "2025-01-02")).unwrap();

        // Clock stepped backwards between the two writes
        store
            .storage()
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE pending_logs SET created_at = ? WHERE local_id = ?",
                    params!["2020-01-01T00:00:00.000000Z", second],
                )?;
                Ok(())
            })
            .unwrap();

        let pending = store.pending_rows(EntityKind::Log).unwrap();
        assert_eq!(
            pending.iter().map(|r| r.local_id).collect::<Vec<_>>(),
            vec![first, second]
        );
        let all = store.rows(EntityKind::Log, Some("u1")).unwrap();
        assert_eq!(
            all.iter().map(|r| r.local_id).collect::<Vec<_>>(),
            vec![first, second]
        );
    }

    #[test]
    fn test_identical_payloads_are_not_merged() {
        let store = StagingStore::open_in_memory().unwrap();
        store.stage(&log("u1", "2025-01-01")).unwrap();
        store.stage(&log("u1", "2025-01-01")).unwrap();
        assert_eq!(store.pending_count(EntityKind::Log).unwrap(), 2);
    }

    #[test]
    fn test_mark_synced_is_idempotent() {
        let store = StagingStore::open_in_memory().unwrap();
        let id = store.stage(&log("u1", "2025-01-01")).unwrap();

        assert!(store.mark_synced(EntityKind::Log, id, "srv-1").unwrap());
        assert!(!store.mark_synced(EntityKind::Log, id, "srv-2").unwrap());

        let row = store.get(EntityKind::Log, id).unwrap().unwrap();
        assert!(row.synced);
        assert_eq!(row.server_id.as_deref(), Some("srv-1"));
        assert_eq!(store.pending_count(EntityKind::Log).unwrap(), 0);
    }

    #[test]
    fn test_mark_synced_unknown_row() {
        let store = StagingStore::open_in_memory().unwrap();
        let result = store.mark_synced(EntityKind::Emergency, 42, "srv");
        assert!(matches!(result, Err(FieldSyncError::NotFound(_))));
    }

    #[test]
    fn test_list_all_filters_by_user_and_keeps_synced() {
        let store = StagingStore::open_in_memory().unwrap();
        let a = store.stage(&log("u1", "2025-01-01")).unwrap();
        store.stage(&log("u2", "2025-01-01")).unwrap();
        store.mark_synced(EntityKind::Log, a, "srv-a").unwrap();

        let mine: Vec<PendingRecord<LogPayload>> = store.list_all(Some("u1")).unwrap();
        assert_eq!(mine.len(), 1);
        assert!(mine[0].synced);

        let everyone: Vec<PendingRecord<LogPayload>> = store.list_all(None).unwrap();
        assert_eq!(everyone.len(), 2);
    }

    #[test]
    fn test_kinds_are_isolated() {
        let store = StagingStore::open_in_memory().unwrap();
        store.stage(&log("u1", "2025-01-01")).unwrap();
        store
            .stage(&ArrivalAlertPayload {
                user_id: None,
                name: "Ana".to_string(),
                arrival_time: "09:00".to_string(),
                exit_time: None,
                accepted: false,
            })
            .unwrap();

        let counts = store.pending_counts().unwrap();
        assert_eq!(counts.logs, 1);
        assert_eq!(counts.arrival_alerts, 1);
        assert_eq!(counts.profiles, 0);
        assert_eq!(counts.total, 2);
    }

    #[test]
    fn test_purge_only_removes_synced_logs() {
        let store = StagingStore::open_in_memory().unwrap();
        let synced = store.stage(&log("u1", "2025-01-01")).unwrap();
        store.stage(&log("u1", "2025-01-02")).unwrap();
        store.mark_synced(EntityKind::Log, synced, "srv").unwrap();

        assert_eq!(store.purge_synced_logs().unwrap(), 1);
        assert!(store.get(EntityKind::Log, synced).unwrap().is_none());
        assert_eq!(store.pending_count(EntityKind::Log).unwrap(), 1);
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::types::StagingConfig {
            db_path: dir.path().join("staging.db").to_string_lossy().to_string(),
            storage_mode: Default::default(),
        };

        let id = {
            let store = StagingStore::new(Storage::open(config.clone()).unwrap());
            store.stage(&log("u1", "2025-01-01")).unwrap()
        };

        let store = StagingStore::new(Storage::open(config).unwrap());
        let pending: Vec<PendingRecord<LogPayload>> = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id, id);
        assert_eq!(pending[0].payload, log("u1", "2025-01-01"));
    }
}
