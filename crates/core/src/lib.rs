//! marksync core library.
//!
//! Keeps one bookmark tree consistent across devices that share a storage
//! backend: content hashing and identity, tree diffing, conflict detection
//! and resolution, merging, the sync engine, and the per-owner version
//! history ledger.

pub mod config;
pub mod conflict;
pub mod db;
pub mod diff;
pub mod errors;
pub mod hasher;
pub mod ledger;
pub mod models;
pub mod plan;
pub mod source;
pub mod sync_engine;
pub mod tree;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{ConflictDetector, ConflictResolver, Merger};
pub use db::Database;
pub use hasher::Checksum;
pub use ledger::{OwnerId, VersionLedger};
pub use models::{SyncRequest, SyncResult, SyncState, SyncStatus};
pub use source::{BookmarkFile, LocalFileSource, MemorySource, SyncSource};
pub use sync_engine::SyncEngine;
pub use tree::{BookmarkNode, BookmarkTree, NodeId};
