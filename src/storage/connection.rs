//! Database connection for the staging store
//!
//! One SQLite connection behind a mutex, shared by every clone. Each staging
//! write is a single statement, so holding the lock for one call serializes
//! row writes between the facade and the orchestrator.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use super::migrations::run_migrations;
use crate::error::Result;
use crate::types::{StagingConfig, StorageMode};

const IN_MEMORY: &str = ":memory:";

/// Shared handle to the staging database
#[derive(Clone)]
pub struct Storage {
    path: Arc<str>,
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (creating if needed) and migrate the database described by `config`
    pub fn open(config: StagingConfig) -> Result<Self> {
        let conn = if config.db_path == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            if let Some(dir) = Path::new(&config.db_path).parent() {
                std::fs::create_dir_all(dir)?;
            }
            Connection::open(&config.db_path)?
        };

        conn.execute_batch(journal_pragmas(config.storage_mode))?;
        run_migrations(&conn)?;

        tracing::debug!(
            path = %config.db_path,
            mode = ?config.storage_mode,
            "Staging database ready"
        );

        Ok(Self {
            path: config.db_path.into(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (tests, ephemeral sessions)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StagingConfig::in_memory())
    }

    /// Run `f` while holding the connection lock
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn db_path(&self) -> &str {
        &self.path
    }

    /// Journal mode SQLite actually settled on (`wal`, `delete`, `memory`)
    pub fn journal_mode(&self) -> Result<String> {
        self.with_connection(|conn| {
            Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?)
        })
    }
}

/// WAL for app-private files; DELETE keeps a single file for synced folders
fn journal_pragmas(mode: StorageMode) -> &'static str {
    match mode {
        StorageMode::Local => {
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=30000;"
        }
        StorageMode::CloudSafe => {
            "PRAGMA journal_mode=DELETE;
             PRAGMA synchronous=FULL;
             PRAGMA busy_timeout=30000;"
        }
    }
}
