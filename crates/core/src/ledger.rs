//! Version history ledger.
//!
//! An append-only, checksum-deduplicated log of snapshots per owner. Rollback
//! appends a prior snapshot as a new head rather than rewriting history, and
//! retention prunes the oldest records while always keeping the newest one.
//!
//! Persistence sits behind [`LedgerStore`] (implemented by
//! [`Database`](crate::db::Database)); the async [`VersionLedger`] facade runs
//! store calls on the blocking thread pool.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::queries::{VersionRow, VersionSummaryRow};
use crate::diff::{self, ChangeType};
use crate::errors::LedgerError;
use crate::hasher::Checksum;
use crate::plan::Plan;
use crate::source::SourceType;
use crate::tree::{BookmarkTree, NodeType};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Account whose history is being recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a version changed relative to its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeSummary {
    /// Leaf-bookmark counts; folders and separators are not counted.
    Sync {
        added: usize,
        removed: usize,
        modified: usize,
    },
    Rollback {
        from: u64,
        to: u64,
    },
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync {
                added,
                removed,
                modified,
            } => write!(f, "+{added} -{removed} ~{modified}"),
            Self::Rollback { from, to } => write!(f, "rollback v{from} -> v{to}"),
        }
    }
}

/// Where a snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_type: SourceType,
    pub source_name: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

impl SourceMetadata {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            source_name: None,
            device_id: None,
            device_name: None,
        }
    }
}

/// One immutable entry of an owner's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: Uuid,
    pub owner: OwnerId,
    pub version: u64,
    pub bookmark_data: BookmarkTree,
    pub checksum: Checksum,
    pub source_type: SourceType,
    pub source_name: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub change_summary: ChangeSummary,
    pub created_at: DateTime<Utc>,
}

/// History listing entry without the snapshot payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version: u64,
    pub checksum: Checksum,
    pub source_type: SourceType,
    pub source_name: Option<String>,
    pub device_name: Option<String>,
    pub change_summary: ChangeSummary,
    pub created_at: DateTime<Utc>,
}

/// A record about to be appended; the store assigns id and version.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub bookmark_data: BookmarkTree,
    pub checksum: Checksum,
    pub metadata: SourceMetadata,
    pub change_summary: ChangeSummary,
    pub created_at: DateTime<Utc>,
}

/// Result of a save: the head record and whether the save was a no-op.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub record: VersionRecord,
    pub skipped: bool,
}

/// How many versions to retain per owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub plan: Plan,
    pub max_versions_override: Option<usize>,
}

impl RetentionPolicy {
    pub fn for_plan(plan: Plan) -> Self {
        Self {
            plan,
            max_versions_override: None,
        }
    }

    /// Effective limit; never below one so the head survives pruning.
    pub fn limit(&self) -> usize {
        self.max_versions_override
            .unwrap_or_else(|| self.plan.max_versions())
            .max(1)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Backing store for the ledger, keyed by owner and version number.
///
/// `append` must assign `version = max(version) + 1` atomically per owner and
/// prune to `keep` records in the same transaction. With `dedup` set, an
/// append whose checksum equals the current head returns the head instead.
pub trait LedgerStore: Send + Sync {
    fn latest(&self, owner: &OwnerId) -> Result<Option<VersionRecord>, LedgerError>;

    fn get(&self, owner: &OwnerId, version: u64) -> Result<Option<VersionRecord>, LedgerError>;

    fn find_by_checksum(
        &self,
        owner: &OwnerId,
        checksum: &Checksum,
    ) -> Result<Option<VersionRecord>, LedgerError>;

    /// Newest first.
    fn list(&self, owner: &OwnerId, limit: usize, offset: usize) -> Result<Vec<VersionSummary>, LedgerError>;

    fn count(&self, owner: &OwnerId) -> Result<usize, LedgerError>;

    fn append(
        &self,
        owner: &OwnerId,
        new: &NewVersion,
        keep: usize,
        dedup: bool,
    ) -> Result<SaveOutcome, LedgerError>;
}

// ---------------------------------------------------------------------------
// Ledger facade
// ---------------------------------------------------------------------------

/// Async facade over a [`LedgerStore`] with a retention policy.
#[derive(Clone)]
pub struct VersionLedger {
    store: Arc<dyn LedgerStore>,
    retention: RetentionPolicy,
}

impl VersionLedger {
    pub fn new(store: Arc<dyn LedgerStore>, retention: RetentionPolicy) -> Self {
        Self { store, retention }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Record `tree` as the owner's newest version.
    ///
    /// If the checksum equals the current head's, the head is returned with
    /// `skipped = true` and nothing is written.
    pub async fn save_version(
        &self,
        owner: &OwnerId,
        tree: &BookmarkTree,
        metadata: SourceMetadata,
    ) -> Result<SaveOutcome, LedgerError> {
        let checksum = tree.checksum()?;
        let owner = owner.clone();
        let tree = tree.clone();
        let keep = self.retention.limit();

        let outcome = self
            .blocking(move |store| {
                let previous = store.latest(&owner)?;
                if let Some(head) = previous.as_ref().filter(|head| head.checksum == checksum) {
                    debug!(owner = %owner, version = head.version, "snapshot unchanged, skipping save");
                    return Ok(SaveOutcome {
                        record: head.clone(),
                        skipped: true,
                    });
                }

                let empty = BookmarkTree::empty();
                let base = previous.as_ref().map_or(&empty, |head| &head.bookmark_data);
                let new = NewVersion {
                    change_summary: summarize(base, &tree),
                    bookmark_data: tree,
                    checksum,
                    metadata,
                    created_at: Utc::now(),
                };
                store.append(&owner, &new, keep, true)
            })
            .await?;

        if !outcome.skipped {
            info!(
                owner = %outcome.record.owner,
                version = outcome.record.version,
                checksum = %outcome.record.checksum.short(),
                summary = %outcome.record.change_summary,
                "version saved"
            );
        }
        Ok(outcome)
    }

    /// Newest-first summaries.
    pub async fn get_history(
        &self,
        owner: &OwnerId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<VersionSummary>, LedgerError> {
        let owner = owner.clone();
        self.blocking(move |store| store.list(&owner, limit, offset)).await
    }

    /// Fetch a specific version; pruned or unknown versions are `VersionNotFound`.
    pub async fn get_version(&self, owner: &OwnerId, version: u64) -> Result<VersionRecord, LedgerError> {
        let owner = owner.clone();
        self.blocking(move |store| {
            store
                .get(&owner, version)?
                .ok_or_else(|| LedgerError::VersionNotFound {
                    owner: owner.to_string(),
                    version,
                })
        })
        .await
    }

    /// Append the snapshot of `target` as a new head version.
    ///
    /// The new record is written even when its content equals the current
    /// head, so every rollback is visible in the history.
    pub async fn rollback(
        &self,
        owner: &OwnerId,
        target: u64,
        metadata: SourceMetadata,
    ) -> Result<VersionRecord, LedgerError> {
        let owner = owner.clone();
        let keep = self.retention.limit();

        let record = self
            .blocking(move |store| {
                let head = store
                    .latest(&owner)?
                    .ok_or_else(|| LedgerError::EmptyHistory(owner.to_string()))?;
                let snapshot = store
                    .get(&owner, target)?
                    .ok_or_else(|| LedgerError::VersionNotFound {
                        owner: owner.to_string(),
                        version: target,
                    })?;

                let new = NewVersion {
                    bookmark_data: snapshot.bookmark_data,
                    checksum: snapshot.checksum,
                    metadata,
                    change_summary: ChangeSummary::Rollback {
                        from: head.version,
                        to: target,
                    },
                    created_at: Utc::now(),
                };
                store.append(&owner, &new, keep, false).map(|outcome| outcome.record)
            })
            .await?;

        info!(owner = %record.owner, target, version = record.version, "rolled back");
        Ok(record)
    }

    pub async fn latest(&self, owner: &OwnerId) -> Result<Option<VersionRecord>, LedgerError> {
        let owner = owner.clone();
        self.blocking(move |store| store.latest(&owner)).await
    }

    /// Most recent retained version with `checksum`, if any.
    pub async fn find_by_checksum(
        &self,
        owner: &OwnerId,
        checksum: &Checksum,
    ) -> Result<Option<VersionRecord>, LedgerError> {
        let owner = owner.clone();
        let checksum = checksum.clone();
        self.blocking(move |store| store.find_by_checksum(&owner, &checksum)).await
    }

    pub async fn count(&self, owner: &OwnerId) -> Result<usize, LedgerError> {
        let owner = owner.clone();
        self.blocking(move |store| store.count(&owner)).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&dyn LedgerStore) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| LedgerError::TaskFailed(e.to_string()))?
    }
}

/// Count leaf-bookmark differences from `previous` to `current`.
pub fn summarize(previous: &BookmarkTree, current: &BookmarkTree) -> ChangeSummary {
    let before = diff::flatten(previous);
    let after = diff::flatten(current);
    let now = Utc::now();

    let mut added = 0;
    let mut modified = 0;
    for change in diff::changes_between(&before, &after, now) {
        let is_bookmark = change
            .after
            .as_ref()
            .is_some_and(|n| n.node_type() == NodeType::Bookmark);
        if !is_bookmark {
            continue;
        }
        match change.change_type {
            ChangeType::Added => added += 1,
            ChangeType::Modified | ChangeType::Moved => modified += 1,
            ChangeType::Deleted => {}
        }
    }

    let removed = diff::detect_deletions(&after, &before)
        .iter()
        .filter(|c| c.before.as_ref().is_some_and(|n| n.node_type() == NodeType::Bookmark))
        .count();

    ChangeSummary::Sync {
        added,
        removed,
        modified,
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn corrupt(owner: &str, version: i64, detail: impl fmt::Display) -> LedgerError {
    LedgerError::CorruptData {
        owner: owner.to_string(),
        version: u64::try_from(version).unwrap_or_default(),
        detail: detail.to_string(),
    }
}

fn decode_common(
    owner: &str,
    version: i64,
    source_type: &str,
    change_summary: &str,
    created_at: &str,
) -> Result<(u64, SourceType, ChangeSummary, DateTime<Utc>), LedgerError> {
    let number = u64::try_from(version).map_err(|e| corrupt(owner, version, e))?;
    let source_type = source_type
        .parse::<SourceType>()
        .map_err(|e| corrupt(owner, version, e))?;
    let change_summary =
        serde_json::from_str(change_summary).map_err(|e| corrupt(owner, version, e))?;
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|e| corrupt(owner, version, e))?
        .with_timezone(&Utc);
    Ok((number, source_type, change_summary, created_at))
}

impl TryFrom<VersionRow> for VersionRecord {
    type Error = LedgerError;

    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        let (version, source_type, change_summary, created_at) = decode_common(
            &row.owner,
            row.version,
            &row.source_type,
            &row.change_summary,
            &row.created_at,
        )?;
        let id = Uuid::parse_str(&row.id).map_err(|e| corrupt(&row.owner, row.version, e))?;
        let bookmark_data: BookmarkTree = serde_json::from_str(&row.bookmark_data)
            .map_err(|e| corrupt(&row.owner, row.version, e))?;
        bookmark_data
            .validate()
            .map_err(|e| corrupt(&row.owner, row.version, e))?;

        Ok(VersionRecord {
            id,
            owner: OwnerId::new(row.owner),
            version,
            bookmark_data,
            checksum: Checksum::from_hex(row.checksum),
            source_type,
            source_name: row.source_name,
            device_id: row.device_id,
            device_name: row.device_name,
            change_summary,
            created_at,
        })
    }
}

impl TryFrom<VersionSummaryRow> for VersionSummary {
    type Error = LedgerError;

    fn try_from(row: VersionSummaryRow) -> Result<Self, Self::Error> {
        let (version, source_type, change_summary, created_at) = decode_common(
            &row.owner,
            row.version,
            &row.source_type,
            &row.change_summary,
            &row.created_at,
        )?;
        Ok(VersionSummary {
            version,
            checksum: Checksum::from_hex(row.checksum),
            source_type,
            source_name: row.source_name,
            device_name: row.device_name,
            change_summary,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::tree::{BookmarkNode, NodePath, RootKind};

    fn ledger_with_limit(limit: usize) -> VersionLedger {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let retention = RetentionPolicy {
            plan: Plan::Free,
            max_versions_override: Some(limit),
        };
        VersionLedger::new(Arc::new(db), retention)
    }

    fn tree_of(urls: &[&str]) -> BookmarkTree {
        let mut tree = BookmarkTree::empty();
        let children = tree.toolbar.children_mut().unwrap();
        for url in urls {
            children.push(BookmarkNode::bookmark(*url, *url));
        }
        tree
    }

    fn meta() -> SourceMetadata {
        SourceMetadata {
            device_name: Some("laptop".into()),
            ..SourceMetadata::new(SourceType::InMemory)
        }
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let ledger = ledger_with_limit(10);
        let owner = OwnerId::new("alice");
        let tree = tree_of(&["https://a.com"]);

        let first = ledger.save_version(&owner, &tree, meta()).await.unwrap();
        let second = ledger.save_version(&owner, &tree, meta()).await.unwrap();
        assert!(!first.skipped);
        assert!(second.skipped);
        assert_eq!(first.record.id, second.record.id);
        assert_eq!(ledger.count(&owner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_versions_are_monotonic_per_owner() {
        let ledger = ledger_with_limit(10);
        let alice = OwnerId::new("alice");
        let bob = OwnerId::new("bob");

        ledger.save_version(&alice, &tree_of(&["https://a.com"]), meta()).await.unwrap();
        let v2 = ledger
            .save_version(&alice, &tree_of(&["https://a.com", "https://b.com"]), meta())
            .await
            .unwrap();
        let bob_v1 = ledger.save_version(&bob, &tree_of(&["https://a.com"]), meta()).await.unwrap();

        assert_eq!(v2.record.version, 2);
        assert_eq!(bob_v1.record.version, 1);
        assert_eq!(
            v2.record.change_summary,
            ChangeSummary::Sync {
                added: 1,
                removed: 0,
                modified: 0
            }
        );
    }

    #[tokio::test]
    async fn test_retention_keeps_newest() {
        let ledger = ledger_with_limit(3);
        let owner = OwnerId::new("alice");
        let urls = ["https://1.com", "https://2.com", "https://3.com", "https://4.com", "https://5.com"];
        for n in 1..=urls.len() {
            ledger.save_version(&owner, &tree_of(&urls[..n]), meta()).await.unwrap();
        }

        let history = ledger.get_history(&owner, 100, 0).await.unwrap();
        let versions: Vec<u64> = history.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![5, 4, 3]);
        assert!(matches!(
            ledger.get_version(&owner, 1).await,
            Err(LedgerError::VersionNotFound { version: 1, .. })
        ));
        assert_eq!(ledger.get_version(&owner, 5).await.unwrap().version, 5);
    }

    #[tokio::test]
    async fn test_zero_limit_still_keeps_head() {
        let ledger = ledger_with_limit(0);
        let owner = OwnerId::new("alice");
        ledger.save_version(&owner, &tree_of(&["https://1.com"]), meta()).await.unwrap();
        ledger
            .save_version(&owner, &tree_of(&["https://2.com"]), meta())
            .await
            .unwrap();
        assert_eq!(ledger.count(&owner).await.unwrap(), 1);
        assert_eq!(ledger.latest(&owner).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_rollback_appends_new_head() {
        let ledger = ledger_with_limit(10);
        let owner = OwnerId::new("alice");
        let v1_tree = tree_of(&["https://a.com"]);
        ledger.save_version(&owner, &v1_tree, meta()).await.unwrap();
        ledger
            .save_version(&owner, &tree_of(&["https://b.com"]), meta())
            .await
            .unwrap();

        let rolled = ledger.rollback(&owner, 1, meta()).await.unwrap();
        assert_eq!(rolled.version, 3);
        assert_eq!(rolled.bookmark_data, v1_tree);
        assert_eq!(rolled.change_summary, ChangeSummary::Rollback { from: 2, to: 1 });

        // Rolling back to the current content still records a version.
        let again = ledger.rollback(&owner, 3, meta()).await.unwrap();
        assert_eq!(again.version, 4);
    }

    #[tokio::test]
    async fn test_rollback_to_unknown_version_fails() {
        let ledger = ledger_with_limit(10);
        let owner = OwnerId::new("alice");
        assert!(matches!(
            ledger.rollback(&owner, 1, meta()).await,
            Err(LedgerError::EmptyHistory(_))
        ));
        ledger.save_version(&owner, &tree_of(&["https://a.com"]), meta()).await.unwrap();
        assert!(matches!(
            ledger.rollback(&owner, 9, meta()).await,
            Err(LedgerError::VersionNotFound { version: 9, .. })
        ));
    }

    #[tokio::test]
    async fn test_find_by_checksum() {
        let ledger = ledger_with_limit(10);
        let owner = OwnerId::new("alice");
        let tree = tree_of(&["https://a.com"]);
        ledger.save_version(&owner, &tree, meta()).await.unwrap();

        let found = ledger
            .find_by_checksum(&owner, &tree.checksum().unwrap())
            .await
            .unwrap();
        assert_eq!(found.unwrap().bookmark_data, tree);
        let missing = ledger
            .find_by_checksum(&owner, &Checksum::from_hex("00"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_summary_counts_leaf_bookmarks_only() {
        let toolbar = NodePath::root(RootKind::Toolbar);
        let previous = tree_of(&["https://a.com", "https://b.com"]);
        let mut current = BookmarkTree::empty();
        let renamed = BookmarkNode::bookmark("https://a.com", "renamed");
        current.toolbar.children_mut().unwrap().extend([
            renamed,
            BookmarkNode::folder(&toolbar, "F", vec![BookmarkNode::bookmark("https://c.com", "c")]),
        ]);

        assert_eq!(
            summarize(&previous, &current),
            ChangeSummary::Sync {
                added: 1,
                removed: 1,
                modified: 1
            }
        );
    }
}
