//! Change detection between bookmark snapshots.
//!
//! Trees are flattened into `id -> (node, parent path, index)` maps and the
//! maps are compared. A two-snapshot comparison cannot tell a deletion on one
//! side from an addition on the other, so deletions are only reported by
//! [`detect_deletions`], which needs the previously synced snapshot.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tree::{BookmarkNode, BookmarkTree, NodeId, NodePath};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Kind of change to a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Moved,
    Deleted,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Moved => write!(f, "moved"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// One node's change on one side of a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChange {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Parent folder path on the changed side (for deletions: where the node
    /// used to live).
    pub path: NodePath,
    /// Sibling index inside `path`.
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<BookmarkNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<BookmarkNode>,
    pub timestamp: DateTime<Utc>,
}

impl SyncChange {
    pub fn is_deletion(&self) -> bool {
        self.change_type == ChangeType::Deleted
    }
}

/// Flattened location of a node.
#[derive(Debug, Clone)]
pub struct FlatEntry {
    pub node: BookmarkNode,
    pub path: NodePath,
    pub index: usize,
}

/// A tree flattened by id, remembering pre-order traversal order.
#[derive(Debug, Clone, Default)]
pub struct FlatTree {
    entries: BTreeMap<NodeId, FlatEntry>,
    order: Vec<NodeId>,
}

impl FlatTree {
    pub fn get(&self, id: &NodeId) -> Option<&FlatEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entries in traversal order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &FlatEntry)> {
        self.order
            .iter()
            .filter_map(move |id| self.entries.get(id).map(|entry| (id, entry)))
    }
}

/// Result of comparing two snapshots.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub local_changes: Vec<SyncChange>,
    pub remote_changes: Vec<SyncChange>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Flatten every non-root node of `tree` by id.
///
/// If an id appears twice (an invalid tree) the first occurrence wins.
pub fn flatten(tree: &BookmarkTree) -> FlatTree {
    let mut flat = FlatTree::default();
    tree.walk(|node, path, index| {
        if flat.entries.contains_key(&node.id) {
            return;
        }
        flat.order.push(node.id.clone());
        flat.entries.insert(
            node.id.clone(),
            FlatEntry {
                node: node.clone(),
                path: path.clone(),
                index,
            },
        );
    });
    flat
}

/// Two-way diff: everything present or different on one side relative to
/// the other becomes a change on that side. No deletions are reported.
pub fn diff(local: &BookmarkTree, remote: &BookmarkTree) -> DiffResult {
    let now = Utc::now();
    let local_flat = flatten(local);
    let remote_flat = flatten(remote);

    let result = DiffResult {
        local_changes: changes_between(&remote_flat, &local_flat, now),
        remote_changes: changes_between(&local_flat, &remote_flat, now),
    };
    debug!(
        local = result.local_changes.len(),
        remote = result.remote_changes.len(),
        "two-way diff complete"
    );
    result
}

/// Three-way diff against the last agreed snapshot. Each side's changes are
/// computed relative to `base`, deletions included.
pub fn diff_three_way(base: &BookmarkTree, local: &BookmarkTree, remote: &BookmarkTree) -> DiffResult {
    let now = Utc::now();
    let base_flat = flatten(base);
    let local_flat = flatten(local);
    let remote_flat = flatten(remote);

    let mut local_changes = changes_between(&base_flat, &local_flat, now);
    local_changes.extend(deletions_at(&local_flat, &base_flat, now));
    let mut remote_changes = changes_between(&base_flat, &remote_flat, now);
    remote_changes.extend(deletions_at(&remote_flat, &base_flat, now));

    debug!(
        local = local_changes.len(),
        remote = remote_changes.len(),
        "three-way diff complete"
    );
    DiffResult {
        local_changes,
        remote_changes,
    }
}

/// Ids present in `previous` but absent from `current`, as `deleted` changes.
pub fn detect_deletions(current: &FlatTree, previous: &FlatTree) -> Vec<SyncChange> {
    deletions_at(current, previous, Utc::now())
}

/// Changes that turn `reference` into `side`: additions, content
/// modifications (type, title, url) and moves between folders.
///
/// Sibling reordering within one folder is not reported.
pub fn changes_between(reference: &FlatTree, side: &FlatTree, now: DateTime<Utc>) -> Vec<SyncChange> {
    let mut changes = Vec::new();
    for (id, entry) in side.iter() {
        let change = match reference.get(id) {
            None => Some((ChangeType::Added, None)),
            Some(prior) if !prior.node.same_content(&entry.node) => {
                Some((ChangeType::Modified, Some(prior.node.clone())))
            }
            Some(prior) if prior.path != entry.path => {
                Some((ChangeType::Moved, Some(prior.node.clone())))
            }
            Some(_) => None,
        };

        if let Some((change_type, before)) = change {
            changes.push(SyncChange {
                id: id.clone(),
                change_type,
                path: entry.path.clone(),
                index: entry.index,
                before,
                after: Some(entry.node.clone()),
                timestamp: entry.node.timestamp().unwrap_or(now),
            });
        }
    }
    changes
}

fn deletions_at(current: &FlatTree, previous: &FlatTree, now: DateTime<Utc>) -> Vec<SyncChange> {
    previous
        .iter()
        .filter(|(id, _)| !current.contains(id))
        .map(|(id, entry)| SyncChange {
            id: id.clone(),
            change_type: ChangeType::Deleted,
            path: entry.path.clone(),
            index: entry.index,
            before: Some(entry.node.clone()),
            after: None,
            timestamp: now,
        })
        .collect()
}
