//! Versioned schema for the sample store.

use log::info;
use rusqlite::Connection;
use rusqlite_migration::{M, Migrations};

/// Schema history. Append only; never edit an applied step.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // v1: samples and sync history
        M::up(
            r#"
            CREATE TABLE samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                accuracy REAL NOT NULL,
                captured_at INTEGER NOT NULL,   -- Unix ms (UTC)
                sync_status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                synced_at INTEGER               -- Unix ms (UTC)
            );

            CREATE INDEX idx_samples_status_order
                ON samples(sync_status, captured_at, id);
            CREATE INDEX idx_samples_captured_at ON samples(captured_at);

            CREATE TABLE sync_outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                success INTEGER NOT NULL,
                message TEXT NOT NULL,
                synced_count INTEGER NOT NULL,
                completed_at INTEGER NOT NULL   -- Unix ms (UTC)
            );
            "#,
        ),
        // v2: keep the last upload error next to the sample
        M::up("ALTER TABLE samples ADD COLUMN last_error TEXT;"),
        M::up(
            "CREATE INDEX idx_sync_outcomes_success ON sync_outcomes(success, completed_at);",
        ),
    ])
}

/// Bring a connection up to the latest schema.
pub fn migrate(conn: &mut Connection) -> Result<(), rusqlite_migration::Error> {
    let before = schema_version(conn);
    migrations().to_latest(conn)?;
    let after = schema_version(conn);
    if before != after {
        info!("[SampleStore] Migrated schema v{} -> v{}", before, after);
    }
    Ok(())
}

/// Current `user_version`; 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> i64 {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        let version = schema_version(&conn);
        assert_eq!(version, 3);

        migrate(&mut conn).unwrap();
        assert_eq!(schema_version(&conn), version);
    }
}
