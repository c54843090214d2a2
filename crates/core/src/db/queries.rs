//! Typed query helpers for every table in the marksync database.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::errors::{DatabaseError, LedgerError};
use crate::hasher::Checksum;
use crate::ledger::{LedgerStore, NewVersion, OwnerId, SaveOutcome, VersionRecord, VersionSummary};

// ---------------------------------------------------------------------------
// Rows returned by queries
// ---------------------------------------------------------------------------

/// A row from the `versions` table.
#[derive(Debug, Clone)]
pub struct VersionRow {
    pub id: String,
    pub owner: String,
    pub version: i64,
    pub bookmark_data: String,
    pub checksum: String,
    pub source_type: String,
    pub source_name: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub change_summary: String,
    pub created_at: String,
}

/// A `versions` row without the snapshot payload.
#[derive(Debug, Clone)]
pub struct VersionSummaryRow {
    pub owner: String,
    pub version: i64,
    pub checksum: String,
    pub source_type: String,
    pub source_name: Option<String>,
    pub device_name: Option<String>,
    pub change_summary: String,
    pub created_at: String,
}

const VERSION_COLUMNS: &str = "id, owner, version, bookmark_data, checksum, source_type, \
     source_name, device_id, device_name, change_summary, created_at";

const SUMMARY_COLUMNS: &str =
    "owner, version, checksum, source_type, source_name, device_name, change_summary, created_at";

fn version_row(row: &Row<'_>) -> rusqlite::Result<VersionRow> {
    Ok(VersionRow {
        id: row.get(0)?,
        owner: row.get(1)?,
        version: row.get(2)?,
        bookmark_data: row.get(3)?,
        checksum: row.get(4)?,
        source_type: row.get(5)?,
        source_name: row.get(6)?,
        device_id: row.get(7)?,
        device_name: row.get(8)?,
        change_summary: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn summary_row(row: &Row<'_>) -> rusqlite::Result<VersionSummaryRow> {
    Ok(VersionSummaryRow {
        owner: row.get(0)?,
        version: row.get(1)?,
        checksum: row.get(2)?,
        source_type: row.get(3)?,
        source_name: row.get(4)?,
        device_name: row.get(5)?,
        change_summary: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn latest_row(conn: &Connection, owner: &str) -> Result<Option<VersionRow>, DatabaseError> {
    let sql = format!(
        "SELECT {VERSION_COLUMNS} FROM versions WHERE owner = ?1 ORDER BY version DESC LIMIT 1"
    );
    Ok(conn.query_row(&sql, params![owner], version_row).optional()?)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- versions -----------------------------------------------------------

    /// Newest version row for `owner`.
    pub fn latest_version_row(&self, owner: &str) -> Result<Option<VersionRow>, DatabaseError> {
        latest_row(&self.conn(), owner)
    }

    /// A specific version row.
    pub fn get_version_row(&self, owner: &str, version: u64) -> Result<Option<VersionRow>, DatabaseError> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM versions WHERE owner = ?1 AND version = ?2");
        let conn = self.conn();
        Ok(conn
            .query_row(&sql, params![owner, to_i64(version)], version_row)
            .optional()?)
    }

    /// Newest row whose checksum equals `checksum`.
    pub fn find_version_row_by_checksum(
        &self,
        owner: &str,
        checksum: &str,
    ) -> Result<Option<VersionRow>, DatabaseError> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM versions WHERE owner = ?1 AND checksum = ?2
             ORDER BY version DESC LIMIT 1"
        );
        let conn = self.conn();
        Ok(conn
            .query_row(&sql, params![owner, checksum], version_row)
            .optional()?)
    }

    /// Summary rows, newest first.
    pub fn list_version_rows(
        &self,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<VersionSummaryRow>, DatabaseError> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM versions WHERE owner = ?1
             ORDER BY version DESC LIMIT ?2 OFFSET ?3"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![owner, to_i64(limit as u64), to_i64(offset as u64)],
                summary_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of retained versions for `owner`.
    pub fn count_versions(&self, owner: &str) -> Result<u64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM versions WHERE owner = ?1",
            params![owner],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Append a version as `max(version) + 1` and prune to `keep` rows, all in
    /// one transaction.
    ///
    /// With `dedup` set and the head already carrying `new.checksum`, nothing
    /// is written and the head is returned with `true`.
    pub fn append_version(
        &self,
        owner: &str,
        new: &NewVersion,
        keep: usize,
        dedup: bool,
    ) -> Result<(VersionRow, bool), DatabaseError> {
        let bookmark_data = serde_json::to_string(&new.bookmark_data)?;
        let change_summary = serde_json::to_string(&new.change_summary)?;
        let keep = to_i64(keep.max(1) as u64);

        self.transaction(|conn| {
            let head = latest_row(conn, owner)?;
            if dedup {
                if let Some(head) = head.as_ref().filter(|h| h.checksum == new.checksum.as_str()) {
                    return Ok((head.clone(), true));
                }
            }

            let version = head.map_or(1, |h| h.version + 1);
            let row = VersionRow {
                id: Uuid::new_v4().to_string(),
                owner: owner.to_string(),
                version,
                bookmark_data,
                checksum: new.checksum.to_string(),
                source_type: new.metadata.source_type.to_string(),
                source_name: new.metadata.source_name.clone(),
                device_id: new.metadata.device_id.clone(),
                device_name: new.metadata.device_name.clone(),
                change_summary,
                created_at: new.created_at.to_rfc3339(),
            };

            conn.execute(
                "INSERT INTO versions (id, owner, version, bookmark_data, checksum, source_type,
                                       source_name, device_id, device_name, change_summary, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    row.id,
                    row.owner,
                    row.version,
                    row.bookmark_data,
                    row.checksum,
                    row.source_type,
                    row.source_name,
                    row.device_id,
                    row.device_name,
                    row.change_summary,
                    row.created_at,
                ],
            )?;

            let pruned = conn.execute(
                "DELETE FROM versions WHERE owner = ?1 AND version <= ?2",
                params![owner, version - keep],
            )?;
            debug!(owner, version, pruned, "appended version");
            Ok((row, false))
        })
    }

    // -- kv_state -----------------------------------------------------------

    /// Get a key-value state entry.
    pub fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    /// Set a key-value state entry (upsert).
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, value, "set kv_state");
        Ok(())
    }

    /// Checksum of the last snapshot `owner` synced from this machine.
    pub fn last_synced_checksum(&self, owner: &OwnerId) -> Result<Option<Checksum>, DatabaseError> {
        Ok(self
            .get_state(&format!("last_checksum:{owner}"))?
            .map(Checksum::from_hex))
    }

    pub fn set_last_synced_checksum(&self, owner: &OwnerId, checksum: &Checksum) -> Result<(), DatabaseError> {
        self.set_state(&format!("last_checksum:{owner}"), checksum.as_str())
    }
}

// ---------------------------------------------------------------------------
// Ledger store
// ---------------------------------------------------------------------------

impl LedgerStore for Database {
    fn latest(&self, owner: &OwnerId) -> Result<Option<VersionRecord>, LedgerError> {
        self.latest_version_row(owner.as_str())?
            .map(VersionRecord::try_from)
            .transpose()
    }

    fn get(&self, owner: &OwnerId, version: u64) -> Result<Option<VersionRecord>, LedgerError> {
        self.get_version_row(owner.as_str(), version)?
            .map(VersionRecord::try_from)
            .transpose()
    }

    fn find_by_checksum(
        &self,
        owner: &OwnerId,
        checksum: &Checksum,
    ) -> Result<Option<VersionRecord>, LedgerError> {
        self.find_version_row_by_checksum(owner.as_str(), checksum.as_str())?
            .map(VersionRecord::try_from)
            .transpose()
    }

    fn list(&self, owner: &OwnerId, limit: usize, offset: usize) -> Result<Vec<VersionSummary>, LedgerError> {
        self.list_version_rows(owner.as_str(), limit, offset)?
            .into_iter()
            .map(VersionSummary::try_from)
            .collect()
    }

    fn count(&self, owner: &OwnerId) -> Result<usize, LedgerError> {
        let count = self.count_versions(owner.as_str())?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    fn append(
        &self,
        owner: &OwnerId,
        new: &NewVersion,
        keep: usize,
        dedup: bool,
    ) -> Result<SaveOutcome, LedgerError> {
        let (row, skipped) = self.append_version(owner.as_str(), new, keep, dedup)?;
        Ok(SaveOutcome {
            record: VersionRecord::try_from(row)?,
            skipped,
        })
    }
}
