//! Ledger schema and its migrations.
//!
//! The SQLite `user_version` pragma holds the number of the last applied
//! migration. Each migration runs in its own transaction together with the
//! pragma bump, so a failure leaves the database at the previous version.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "version ledger and kv state",
    sql: r#"
        CREATE TABLE IF NOT EXISTS versions (
            id              TEXT PRIMARY KEY,
            owner           TEXT    NOT NULL,
            version         INTEGER NOT NULL,
            bookmark_data   TEXT    NOT NULL,
            checksum        TEXT    NOT NULL,
            source_type     TEXT    NOT NULL,
            source_name     TEXT,
            device_id       TEXT,
            device_name     TEXT,
            change_summary  TEXT    NOT NULL,
            created_at      TEXT    NOT NULL,
            UNIQUE (owner, version)
        );

        CREATE INDEX IF NOT EXISTS idx_versions_owner_checksum ON versions (owner, checksum);

        CREATE TABLE IF NOT EXISTS kv_state (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
}];

/// Newest schema version this build knows.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Bring `conn` up to [`latest_version`].
pub fn run_migrations(conn: &mut Connection) -> Result<(), DatabaseError> {
    let current = user_version(conn)?;
    let target = latest_version();
    if current > target {
        return Err(DatabaseError::MigrationFailed {
            version: current,
            detail: format!("database schema is newer than this build (knows up to {target})"),
        });
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        debug!(version = current, "ledger schema up to date");
        return Ok(());
    }

    for migration in pending {
        info!(
            version = migration.version,
            description = migration.description,
            "applying ledger migration"
        );
        let failed = |e: rusqlite::Error| DatabaseError::MigrationFailed {
            version: migration.version,
            detail: e.to_string(),
        };
        let tx = conn.transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.pragma_update(None, "user_version", migration.version)
            .map_err(failed)?;
        tx.commit().map_err(failed)?;
    }
    Ok(())
}

pub(crate) fn user_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_rerun_is_a_noop() {
        let mut conn = migrated();
        run_migrations(&mut conn).unwrap();
        assert_eq!(user_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn test_ledger_tables_exist() {
        let conn = migrated();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('versions', 'kv_state')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_owner_version_is_unique() {
        let conn = migrated();
        let insert = "INSERT INTO versions (id, owner, version, bookmark_data, checksum, source_type, change_summary, created_at)
                      VALUES (?1, 'alice', 1, '{}', 'c', 'in_memory', '{}', 'now')";
        conn.execute(insert, ["a"]).unwrap();
        assert!(conn.execute(insert, ["b"]).is_err());
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", latest_version() + 1).unwrap();
        assert!(matches!(
            run_migrations(&mut conn),
            Err(DatabaseError::MigrationFailed { .. })
        ));
    }
}
