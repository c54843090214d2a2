//! Bookmark sync orchestrator.
//!
//! The [`SyncEngine`] drives one sync as a state machine:
//!
//! 1. Read the remote snapshot; bootstrap it from the local tree if absent.
//! 2. Compare checksums and stop early when nothing changed.
//! 3. Diff local and remote (against a base snapshot when one is known).
//! 4. Detect and resolve conflicts, then merge.
//! 5. Conditionally write the merged snapshot and append it to the ledger.
//!
//! A failed conditional write means another device wrote in between; the
//! whole pipeline is re-run against the fresh remote, up to a limit.
//! Hashing, diffing, resolution and merging never suspend; the only await
//! points are source reads/writes and ledger calls.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::conflict::{ConflictDetector, ConflictResolver, Merger, SyncConflict};
use crate::diff::{self, DiffResult};
use crate::errors::{SourceError, SyncError};
use crate::hasher::Checksum;
use crate::ledger::{OwnerId, SourceMetadata, VersionLedger, VersionRecord};
use crate::models::{SyncRequest, SyncResult, SyncState, SyncStatus};
use crate::source::{BookmarkFile, SyncSource};
use crate::tree::{BookmarkTree, NodeId};

/// Default number of pipeline runs before giving up on a busy remote.
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-device engine settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub max_write_attempts: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            device_id: None,
            device_name: None,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }
}

/// Shared handle that requests cancellation of the running sync.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The bookmark sync engine for one device and one remote source.
pub struct SyncEngine {
    source: Arc<dyn SyncSource>,
    ledger: VersionLedger,
    options: EngineOptions,
    /// Atomic flag preventing concurrent syncs in this process.
    running: Arc<AtomicBool>,
    /// Set by [`CancelHandle`]; cleared when the sync holding the lock ends.
    cancel_requested: Arc<AtomicBool>,
    /// When the sync currently holding the lock began.
    started_at: Mutex<Option<DateTime<Utc>>>,
}

enum Attempt {
    Finished(SyncResult),
    /// The conditional write lost a race; re-read and re-merge.
    Retry,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn SyncSource>, ledger: VersionLedger, options: EngineOptions) -> Self {
        info!(source = source.name(), kind = %source.source_type(), "initializing sync engine");
        Self {
            source,
            ledger,
            options,
            running: Arc::new(AtomicBool::new(false)),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            started_at: Mutex::new(None),
        }
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    pub fn source(&self) -> &dyn SyncSource {
        self.source.as_ref()
    }

    /// Check if a sync is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the running sync to stop at its next step boundary.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Handle that cancels the running sync before it persists anything.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel_requested.clone())
    }

    // -----------------------------------------------------------------------
    // Main entry points
    // -----------------------------------------------------------------------

    /// Run one sync, reporting failures as a [`SyncResult`] with
    /// `status = error` instead of an `Err`.
    pub async fn run(&self, request: &SyncRequest) -> SyncResult {
        let mut trace = vec![SyncState::Start];
        match self.sync_traced(request, &mut trace).await {
            Ok(result) => result,
            Err(e) => {
                warn!(owner = %request.owner, error = %e, "sync failed");
                trace.push(SyncState::Error);
                SyncResult::failed(&e, trace)
            }
        }
    }

    /// Run one sync.
    pub async fn sync(&self, request: &SyncRequest) -> Result<SyncResult, SyncError> {
        let mut trace = vec![SyncState::Start];
        self.sync_traced(request, &mut trace).await
    }

    async fn sync_traced(
        &self,
        request: &SyncRequest,
        trace: &mut Vec<SyncState>,
    ) -> Result<SyncResult, SyncError> {
        let _guard = self.acquire()?;

        info!(
            owner = %request.owner,
            strategy = %request.strategy,
            force = request.force,
            dry_run = request.dry_run,
            "starting sync"
        );

        request.local.validate()?;
        let local_checksum = request.local.checksum()?;

        let max_attempts = self.options.max_write_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.attempt(request, &local_checksum, trace).await? {
                Attempt::Finished(mut result) => {
                    result.attempts = attempt;
                    result.state_trace = trace.clone();
                    info!(
                        owner = %request.owner,
                        status = %result.status,
                        pushed = result.pushed,
                        pulled = result.pulled,
                        conflicts = result.conflicts.len(),
                        attempt,
                        "sync complete"
                    );
                    return Ok(result);
                }
                Attempt::Retry => {
                    info!(attempt, max_attempts, "remote changed during sync, retrying");
                }
            }
        }
        Err(SyncError::ConcurrentModification {
            attempts: max_attempts,
        })
    }

    /// Restore `version` from the ledger: write it to the remote, then
    /// append it to the ledger as a new rollback version.
    pub async fn restore(&self, owner: &OwnerId, version: u64) -> Result<VersionRecord, SyncError> {
        let _guard = self.acquire()?;
        let target = self.ledger.get_version(owner, version).await?;
        info!(owner = %owner, version, "restoring version");

        let max_attempts = self.options.max_write_attempts.max(1);
        for _ in 0..max_attempts {
            let current = match self.source.read().await {
                Ok(file) => Some(file),
                Err(SourceError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            let file = BookmarkFile::new(
                target.bookmark_data.clone(),
                current.as_ref().map_or(1, |f| f.version + 1),
                self.options.device_name.clone(),
            )?;
            let expected = current.as_ref().map(|f| &f.metadata.checksum);

            match self.source.write(&file, expected).await {
                Ok(()) => {
                    let record = self.ledger.rollback(owner, version, self.metadata()).await?;
                    return Ok(record);
                }
                Err(SourceError::ChecksumMismatch { .. }) => {
                    warn!(owner = %owner, "remote changed during restore, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SyncError::ConcurrentModification {
            attempts: max_attempts,
        })
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    async fn attempt(
        &self,
        request: &SyncRequest,
        local_checksum: &Checksum,
        trace: &mut Vec<SyncState>,
    ) -> Result<Attempt, SyncError> {
        enter(trace, SyncState::ReadRemote)?;
        let remote_file = match self.source.read().await {
            Ok(file) => file,
            Err(SourceError::NotFound(_)) => {
                return self.bootstrap(request, local_checksum, trace).await;
            }
            Err(e) => return Err(e.into()),
        };
        self.check_cancel(trace)?;

        enter(trace, SyncState::ComputeChecksums)?;
        let remote = &remote_file.bookmarks;
        let remote_checksum = remote.checksum()?;
        if remote_checksum != remote_file.metadata.checksum {
            warn!(
                stored = %remote_file.metadata.checksum.short(),
                computed = %remote_checksum.short(),
                "stored checksum does not match remote content"
            );
        }

        if *local_checksum == remote_checksum && !request.force {
            enter(trace, SyncState::ShortCircuit)?;
            debug!(checksum = %remote_checksum.short(), "local and remote identical");
            let version = self.ledger.latest(&request.owner).await?.map(|r| r.version);
            enter(trace, SyncState::Done)?;
            return Ok(Attempt::Finished(SyncResult {
                status: SyncStatus::Success,
                checksum: Some(remote_checksum),
                version,
                short_circuited: true,
                dry_run: request.dry_run,
                ..SyncResult::default()
            }));
        }

        enter(trace, SyncState::Diff)?;
        let changes = self
            .compute_diff(request, remote, local_checksum, &remote_checksum)
            .await?;
        self.check_cancel(trace)?;

        enter(trace, SyncState::ResolveConflicts)?;
        let detection = ConflictDetector::detect(&changes.local_changes, &changes.remote_changes);
        let conflicts =
            ConflictResolver::resolve_all(detection.conflicts, request.strategy, request.delete_resolution);

        enter(trace, SyncState::Merge)?;
        let merged = Merger::merge(
            &request.local,
            remote,
            &changes.local_changes,
            &changes.remote_changes,
            &conflicts,
        )?;
        let merged_checksum = merged.checksum()?;

        let mut excluded: BTreeSet<&NodeId> = conflicts.iter().map(|c| &c.id).collect();
        excluded.extend(detection.converged.iter());
        let pushed = count_ids(&changes.local_changes, &excluded);
        let pulled = count_ids(&changes.remote_changes, &excluded);
        let manual_conflicts = conflicts.iter().filter(|c| c.requires_manual_resolution).count();
        self.check_cancel(trace)?;

        let mut result = SyncResult {
            status: status_for(&conflicts),
            pushed,
            pulled,
            manual_conflicts,
            checksum: Some(merged_checksum.clone()),
            dry_run: request.dry_run,
            ..SyncResult::default()
        };

        if request.dry_run {
            info!(pushed, pulled, conflicts = conflicts.len(), "dry run, skipping persist");
            enter(trace, SyncState::Done)?;
            result.conflicts = conflicts;
            result.merged = Some(merged);
            return Ok(Attempt::Finished(result));
        }

        enter(trace, SyncState::Persist)?;
        if merged_checksum != remote_checksum {
            let file = BookmarkFile::new(
                merged.clone(),
                remote_file.version + 1,
                self.options.device_name.clone(),
            )?;
            if !self
                .write_conditionally(&file, Some(&remote_file.metadata.checksum))
                .await?
            {
                return Ok(Attempt::Retry);
            }
        } else {
            debug!("merged snapshot equals remote, no write needed");
        }

        let saved = self
            .ledger
            .save_version(&request.owner, &merged, self.metadata())
            .await?;
        enter(trace, SyncState::Done)?;

        result.version = Some(saved.record.version);
        result.conflicts = conflicts;
        result.merged = Some(merged);
        Ok(Attempt::Finished(result))
    }

    async fn bootstrap(
        &self,
        request: &SyncRequest,
        local_checksum: &Checksum,
        trace: &mut Vec<SyncState>,
    ) -> Result<Attempt, SyncError> {
        enter(trace, SyncState::Bootstrap)?;
        info!(owner = %request.owner, source = self.source.name(), "no remote snapshot, bootstrapping");

        let mut result = SyncResult {
            status: SyncStatus::Success,
            pushed: request.local.node_count(),
            checksum: Some(local_checksum.clone()),
            merged: Some(request.local.clone()),
            bootstrapped: true,
            dry_run: request.dry_run,
            ..SyncResult::default()
        };
        self.check_cancel(trace)?;

        if request.dry_run {
            enter(trace, SyncState::Done)?;
            return Ok(Attempt::Finished(result));
        }

        enter(trace, SyncState::Persist)?;
        let file = BookmarkFile::new(request.local.clone(), 1, self.options.device_name.clone())?;
        if !self.write_conditionally(&file, None).await? {
            return Ok(Attempt::Retry);
        }

        let saved = self
            .ledger
            .save_version(&request.owner, &request.local, self.metadata())
            .await?;
        enter(trace, SyncState::Done)?;
        result.version = Some(saved.record.version);
        Ok(Attempt::Finished(result))
    }

    /// Changes on each side, three-way when a base snapshot can be found.
    async fn compute_diff(
        &self,
        request: &SyncRequest,
        remote: &BookmarkTree,
        local_checksum: &Checksum,
        remote_checksum: &Checksum,
    ) -> Result<DiffResult, SyncError> {
        let base = match &request.previous_checksum {
            None => None,
            Some(previous) if previous == remote_checksum => Some(remote.clone()),
            Some(previous) if previous == local_checksum => Some(request.local.clone()),
            Some(previous) => self
                .ledger
                .find_by_checksum(&request.owner, previous)
                .await?
                .map(|record| record.bookmark_data),
        };

        Ok(match base {
            Some(base) => {
                debug!("diffing against base snapshot");
                diff::diff_three_way(&base, &request.local, remote)
            }
            None => {
                warn!(
                    owner = %request.owner,
                    "no base snapshot available; two-way diff cannot detect deletions"
                );
                diff::diff(&request.local, remote)
            }
        })
    }

    /// Write `file` if the remote still carries `expected`. `Ok(false)` means
    /// another writer got there first.
    async fn write_conditionally(
        &self,
        file: &BookmarkFile,
        expected: Option<&Checksum>,
    ) -> Result<bool, SyncError> {
        match self.source.write(file, expected).await {
            Ok(()) => Ok(true),
            Err(SourceError::ChecksumMismatch { expected, found }) => {
                warn!(?expected, ?found, "conditional write rejected");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            source_type: self.source.source_type(),
            source_name: Some(self.source.name().to_string()),
            device_id: self.options.device_id.clone(),
            device_name: self.options.device_name.clone(),
        }
    }

    fn check_cancel(&self, trace: &[SyncState]) -> Result<(), SyncError> {
        if self.cancel_requested.swap(false, Ordering::SeqCst) {
            let state = trace.last().copied().unwrap_or(SyncState::Start);
            info!(%state, "sync cancelled");
            return Err(SyncError::Cancelled {
                state: state.to_string(),
            });
        }
        Ok(())
    }

    fn acquire(&self) -> Result<SyncLockGuard, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let started = *self
                .started_at
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let started_at = started.map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339());
            return Err(SyncError::AlreadyRunning { started_at });
        }
        *self
            .started_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Utc::now());
        Ok(SyncLockGuard {
            running: self.running.clone(),
            cancel_requested: self.cancel_requested.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// RAII guard that releases the running flag on drop (even on panic).
///
/// A cancel request is consumed by the sync it was aimed at, so it is
/// cleared here rather than when the next sync starts.
struct SyncLockGuard {
    running: Arc<AtomicBool>,
    cancel_requested: Arc<AtomicBool>,
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

fn enter(trace: &mut Vec<SyncState>, next: SyncState) -> Result<(), SyncError> {
    let current = trace.last().copied().unwrap_or(SyncState::Start);
    if !current.can_transition_to(next) {
        return Err(SyncError::InvalidStateTransition {
            from: current.to_string(),
            to: next.to_string(),
        });
    }
    debug!(from = %current, to = %next, "sync state transition");
    trace.push(next);
    Ok(())
}

fn count_ids(changes: &[diff::SyncChange], excluded: &BTreeSet<&NodeId>) -> usize {
    changes
        .iter()
        .map(|c| &c.id)
        .filter(|id| !excluded.contains(id))
        .collect::<BTreeSet<_>>()
        .len()
}

fn status_for(conflicts: &[SyncConflict]) -> SyncStatus {
    if conflicts.is_empty() {
        SyncStatus::Success
    } else {
        SyncStatus::Conflict
    }
}
