//! Database migrations for the staging store

use rusqlite::Connection;

use crate::error::Result;
use crate::types::EntityKind;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // An unreadable version must not replay migrations over existing data
    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Staging tables, one per entity kind (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    for kind in EntityKind::ALL {
        let table = kind.staging_table();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                local_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                server_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_{table}_pending
                ON {table}(synced, created_at);
            CREATE INDEX IF NOT EXISTS idx_{table}_user
                ON {table}(user_id);
            "#
        ))?;
    }

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

/// Offline read cache of remote records (v2)
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS remote_cache (
            entity TEXT NOT NULL,
            remote_id TEXT NOT NULL,
            user_id TEXT,
            payload TEXT NOT NULL,
            cached_at TEXT NOT NULL,
            PRIMARY KEY (entity, remote_id)
        );

        CREATE INDEX IF NOT EXISTS idx_remote_cache_user
            ON remote_cache(entity, user_id);

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        for kind in EntityKind::ALL {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                    [kind.staging_table()],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "missing table for {}", kind);
        }
    }

    #[test]
    fn test_unreadable_schema_version_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE schema_version (version TEXT, applied_at TEXT);
             INSERT INTO schema_version (version) VALUES ('garbled');",
        )
        .unwrap();

        assert!(run_migrations(&conn).is_err());

        let staged_tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'pending_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(staged_tables, 0);
    }
}
