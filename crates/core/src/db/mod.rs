//! SQLite storage for the version ledger.
//!
//! [`Database`] owns a single connection in WAL mode. It implements
//! [`LedgerStore`](crate::ledger::LedgerStore) (see [`queries`]) and keeps a
//! small key-value table for caller bookkeeping such as the last synced
//! checksum of each owner.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{info, warn};

use crate::errors::DatabaseError;

/// Shared SQLite handle. `Send + Sync` through the inner `Mutex`, so it can
/// sit behind an `Arc<dyn LedgerStore>`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the ledger file at `path` (parent directories are created) and
    /// migrate it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let db = Self::new(path)?;
        db.initialize()?;
        Ok(db)
    }

    /// Open the ledger file at `path` without migrating.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)?,
            _ => {}
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        info!(path = %path.display(), "ledger database opened");
        Ok(Self::wrap(conn))
    }

    /// Private in-memory database, for tests and throwaway ledgers.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::wrap(Connection::open_in_memory()?))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Apply pending schema migrations.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        schema::run_migrations(&mut self.conn())
    }

    /// Lock the connection. A mutex poisoned by a panicking holder is
    /// recovered; SQLite keeps its own consistency.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("ledger connection mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in one SQLite transaction: committed on `Ok`, rolled back on
    /// `Err`.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
