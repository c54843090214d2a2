//! Request, result and state types of the sync pipeline.
//!
//! These types bridge the sync engine and its callers (the CLI, or any
//! embedding process).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::conflict::{DeleteResolution, ResolutionStrategy, SyncConflict};
use crate::errors::SyncError;
use crate::hasher::Checksum;
use crate::ledger::OwnerId;
use crate::tree::BookmarkTree;

// ---------------------------------------------------------------------------
// Sync state machine
// ---------------------------------------------------------------------------

/// Steps of one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Start,
    ReadRemote,
    Bootstrap,
    ComputeChecksums,
    ShortCircuit,
    Diff,
    ResolveConflicts,
    Merge,
    Persist,
    Done,
    Error,
}

impl SyncState {
    /// Whether the pipeline may move from `self` to `next`.
    ///
    /// `Persist -> ReadRemote` is the re-fetch after a failed conditional
    /// write; `Bootstrap -> Done` and `Merge -> Done` are dry runs.
    pub fn can_transition_to(&self, next: SyncState) -> bool {
        use SyncState::*;
        match (self, next) {
            (Done, _) => false,
            (_, Error) => true,
            (Start, ReadRemote) => true,
            (ReadRemote, Bootstrap | ComputeChecksums) => true,
            (Bootstrap, Persist | Done) => true,
            (ComputeChecksums, ShortCircuit | Diff) => true,
            (ShortCircuit, Done) => true,
            (Diff, ResolveConflicts) => true,
            (ResolveConflicts, Merge) => true,
            (Merge, Persist | Done) => true,
            (Persist, Done | ReadRemote) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::ReadRemote => "read_remote",
            Self::Bootstrap => "bootstrap",
            Self::ComputeChecksums => "compute_checksums",
            Self::ShortCircuit => "short_circuit",
            Self::Diff => "diff",
            Self::ResolveConflicts => "resolve_conflicts",
            Self::Merge => "merge",
            Self::Persist => "persist",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Everything a caller supplies for one sync.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub owner: OwnerId,
    pub local: BookmarkTree,
    /// Checksum of the last snapshot this caller synced; enables deletion
    /// detection when a matching base snapshot can be found.
    pub previous_checksum: Option<Checksum>,
    pub strategy: ResolutionStrategy,
    pub delete_resolution: DeleteResolution,
    /// Run the full pipeline even when checksums already match.
    pub force: bool,
    /// Run every step except the final write.
    pub dry_run: bool,
}

impl SyncRequest {
    pub fn new(owner: OwnerId, local: BookmarkTree) -> Self {
        Self {
            owner,
            local,
            previous_checksum: None,
            strategy: ResolutionStrategy::default(),
            delete_resolution: DeleteResolution::default(),
            force: false,
            dry_run: false,
        }
    }

    /// Request for a caller whose local snapshot may not exist yet.
    ///
    /// Without a local snapshot the remembered base no longer describes the
    /// local side, so it is dropped: an empty tree diffed against a base
    /// would read as every node deleted locally.
    pub fn for_local(
        owner: OwnerId,
        local: Option<BookmarkTree>,
        previous_checksum: Option<Checksum>,
    ) -> Self {
        match local {
            Some(tree) => Self::new(owner, tree).with_previous_checksum(previous_checksum),
            None => Self::new(owner, BookmarkTree::empty()),
        }
    }

    pub fn with_previous_checksum(mut self, checksum: Option<Checksum>) -> Self {
        self.previous_checksum = checksum;
        self
    }

    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_delete_resolution(mut self, delete_resolution: DeleteResolution) -> Self {
        self.delete_resolution = delete_resolution;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Overall outcome of a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Completed without conflicts.
    #[default]
    Success,
    /// Completed; at least one conflict was resolved or flagged.
    Conflict,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Conflict => write!(f, "conflict"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What a sync did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResult {
    pub status: SyncStatus,
    /// Local changes sent to the remote; conflicted ids excluded.
    pub pushed: usize,
    /// Remote changes applied locally; conflicted ids excluded.
    pub pulled: usize,
    pub conflicts: Vec<SyncConflict>,
    /// Conflicts flagged for a human to review.
    pub manual_conflicts: usize,
    /// Checksum of the remote snapshot after this sync.
    pub checksum: Option<Checksum>,
    /// The merged tree the caller should adopt locally.
    pub merged: Option<BookmarkTree>,
    /// Ledger version recorded (or matched) for this snapshot.
    pub version: Option<u64>,
    pub bootstrapped: bool,
    pub short_circuited: bool,
    pub dry_run: bool,
    pub attempts: u32,
    pub state_trace: Vec<SyncState>,
    pub error: Option<String>,
}

impl SyncResult {
    /// Result reported for a sync that ended in `error`.
    pub fn failed(error: &SyncError, state_trace: Vec<SyncState>) -> Self {
        Self {
            status: SyncStatus::Error,
            error: Some(error.to_string()),
            state_trace,
            ..Self::default()
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}
