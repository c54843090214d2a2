//! Error types for the marksync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Hashing errors
// ---------------------------------------------------------------------------

/// Errors from canonical serialization ahead of hashing.
#[derive(Debug, Error)]
pub enum HashError {
    /// The value could not be converted to canonical JSON.
    #[error("canonical serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Tree errors
// ---------------------------------------------------------------------------

/// Structural validation failures of a bookmark tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Two nodes share the same identity.
    #[error("duplicate node id '{id}' at '{first}' and '{second}'")]
    DuplicateId {
        id: String,
        first: String,
        second: String,
    },

    /// A root is missing, mistyped, or carries the wrong fixed id.
    #[error("invalid root '{root}': {detail}")]
    InvalidRoot {
        root: String,
        detail: String,
    },

    /// Checksum computation failed.
    #[error("tree checksum failed: {0}")]
    Hash(#[from] HashError),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from applying change sets onto a snapshot.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A change targets a path whose parent is not a folder.
    #[error("cannot place node under '{path}': parent is not a folder")]
    ParentNotFolder {
        path: String,
    },

    /// The merged tree failed validation.
    #[error("merged tree is invalid: {0}")]
    InvalidResult(#[from] TreeError),
}

// ---------------------------------------------------------------------------
// Sync source errors
// ---------------------------------------------------------------------------

/// Errors from a remote storage backend.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No snapshot has been stored yet.
    #[error("remote snapshot not found: {0}")]
    NotFound(String),

    /// The remote changed since it was read (optimistic concurrency failure).
    #[error("remote checksum mismatch (expected {expected:?}, found {found:?})")]
    ChecksumMismatch {
        expected: Option<String>,
        found: Option<String>,
    },

    /// The stored snapshot is unreadable or structurally invalid.
    #[error("remote snapshot is corrupt: {0}")]
    Corrupt(String),

    /// A transient backend failure (network, throttling, ...).
    #[error("transient source failure: {0}")]
    Transient(String),

    /// JSON encoding failure while preparing a write.
    #[error("source serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O wrapper.
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Ledger errors
// ---------------------------------------------------------------------------

/// Errors from the version history ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The requested version does not exist or has been pruned.
    #[error("version {version} not found for owner '{owner}'")]
    VersionNotFound {
        owner: String,
        version: u64,
    },

    /// The owner has no recorded versions.
    #[error("no version history for owner '{0}'")]
    EmptyHistory(String),

    /// A stored snapshot failed to decode or validate.
    #[error("stored version {version} for owner '{owner}' is corrupt: {detail}")]
    CorruptData {
        owner: String,
        version: u64,
        detail: String,
    },

    /// Checksum computation failed.
    #[error("ledger hash error: {0}")]
    Hash(#[from] HashError),

    /// Underlying storage error.
    #[error("ledger database error: {0}")]
    Database(#[from] DatabaseError),

    /// The blocking storage task panicked or was cancelled.
    #[error("ledger task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from loading or validating `marksync.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    FileNotFound(String),

    #[error("config file is not valid TOML: {0}")]
    ParseError(String),

    /// A value parsed but cannot be used.
    #[error("config value '{field}' rejected: {detail}")]
    InvalidValue { field: String, detail: String },

    #[error("could not read config file: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite ledger store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("sqlite: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// Schema migration `version` could not be applied.
    #[error("ledger schema migration {version} failed: {detail}")]
    MigrationFailed { version: u32, detail: String },

    #[error("no {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// A JSON column (snapshot or change summary) did not encode or decode.
    #[error("ledger column encoding: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Creating the database directory or file failed.
    #[error("ledger file: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Errors from the sync orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another sync attempt is already running in this process.
    #[error("sync already in progress (started at {started_at})")]
    AlreadyRunning {
        started_at: String,
    },

    /// The attempt was cancelled before anything was persisted.
    #[error("sync cancelled during {state}")]
    Cancelled {
        state: String,
    },

    /// The remote kept changing underneath us.
    #[error("remote modified concurrently; gave up after {attempts} attempts")]
    ConcurrentModification {
        attempts: u32,
    },

    /// A state-machine transition was invalid.
    #[error("invalid sync state transition from {from} to {to}")]
    InvalidStateTransition {
        from: String,
        to: String,
    },

    /// Underlying source error during sync.
    #[error("sync source error: {0}")]
    Source(#[from] SourceError),

    /// Underlying ledger error during sync.
    #[error("sync ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Merge failure.
    #[error("sync merge error: {0}")]
    Merge(#[from] MergeError),

    /// Local tree failed validation.
    #[error("sync tree error: {0}")]
    Tree(#[from] TreeError),

    /// Checksum computation failed.
    #[error("sync hash error: {0}")]
    Hash(#[from] HashError),
}
