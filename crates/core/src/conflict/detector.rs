//! Conflict detection logic.
//!
//! Given the local and remote change lists of one sync attempt, the detector
//! pairs changes that touch the same identity and classifies the shape of
//! each pair. Every shared id yields at most one pair.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diff::{ChangeType, SyncChange};
use crate::tree::{NodeId, NodeType};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which side of the sync a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Shape of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ConflictKind {
    /// Both sides changed title or type of the same node differently.
    Content,
    /// Both sides moved the same node to different folders.
    Move,
    /// One side deleted what the other side modified.
    DeleteModify { deleted_side: Side },
    /// Both sides changed the same bookmark's URL to different values.
    UrlDivergence,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content => write!(f, "content"),
            Self::Move => write!(f, "move"),
            Self::DeleteModify { deleted_side } => write!(f, "delete_modify({deleted_side})"),
            Self::UrlDivergence => write!(f, "url_divergence"),
        }
    }
}

/// A local and a remote change to the same identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPair {
    pub id: NodeId,
    pub kind: ConflictKind,
    pub local: SyncChange,
    pub remote: SyncChange,
}

/// Outcome of pairing two change lists.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub conflicts: Vec<ConflictPair>,
    /// Ids both sides changed to the same result (including both deleted).
    pub converged: BTreeSet<NodeId>,
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Stateless conflict detector that compares two change lists.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Pair changes by shared id and return the conflicting pairs.
    pub fn find_conflicts(local: &[SyncChange], remote: &[SyncChange]) -> Vec<ConflictPair> {
        Self::detect(local, remote).conflicts
    }

    /// Full detection: conflicting pairs plus ids that converged.
    pub fn detect(local: &[SyncChange], remote: &[SyncChange]) -> Detection {
        info!(
            local_count = local.len(),
            remote_count = remote.len(),
            "detecting conflicts"
        );

        let mut detection = Detection::default();
        let mut paired: BTreeSet<NodeId> = BTreeSet::new();

        let remote_by_id = index_by_id(remote);

        for local_change in local {
            if !paired.insert(local_change.id.clone()) {
                continue;
            }
            let Some(remote_change) = remote_by_id.get(&local_change.id) else {
                continue;
            };
            match classify_conflict(local_change, remote_change) {
                Some(kind) => {
                    debug!(id = %local_change.id, %kind, "conflict detected");
                    detection.conflicts.push(ConflictPair {
                        id: local_change.id.clone(),
                        kind,
                        local: local_change.clone(),
                        remote: (*remote_change).clone(),
                    });
                }
                None => {
                    detection.converged.insert(local_change.id.clone());
                }
            }
        }

        // URL edits show up as delete(old) + add(new) on each side. If both
        // sides edited the same bookmark to different URLs, flag the old id.
        let local_edits = url_edits(local);
        let remote_edits = url_edits(remote);
        for (old_id, local_add) in &local_edits {
            let Some(remote_add) = remote_edits.get(old_id) else {
                continue;
            };
            if local_add.id == remote_add.id {
                continue;
            }
            debug!(id = %old_id, "divergent url edits detected");
            detection.converged.remove(old_id);
            detection.conflicts.push(ConflictPair {
                id: old_id.clone(),
                kind: ConflictKind::UrlDivergence,
                local: (*local_add).clone(),
                remote: (*remote_add).clone(),
            });
        }

        info!(
            count = detection.conflicts.len(),
            converged = detection.converged.len(),
            "conflict detection complete"
        );
        detection
    }
}

fn index_by_id(changes: &[SyncChange]) -> BTreeMap<&NodeId, &SyncChange> {
    let mut by_id = BTreeMap::new();
    for change in changes {
        by_id.entry(&change.id).or_insert(change);
    }
    by_id
}

/// Classify two changes to the same id; `None` means they agree.
fn classify_conflict(local: &SyncChange, remote: &SyncChange) -> Option<ConflictKind> {
    match (&local.after, &remote.after) {
        // Both deleted -- no conflict.
        (None, None) => None,

        (None, Some(_)) => Some(ConflictKind::DeleteModify {
            deleted_side: Side::Local,
        }),
        (Some(_), None) => Some(ConflictKind::DeleteModify {
            deleted_side: Side::Remote,
        }),

        (Some(l), Some(r)) => {
            // Only reachable with ids not derived from the URL.
            if l.node_type() == NodeType::Bookmark
                && r.node_type() == NodeType::Bookmark
                && l.url() != r.url()
            {
                return Some(ConflictKind::UrlDivergence);
            }
            if !l.same_content(r) {
                Some(ConflictKind::Content)
            } else if local.path != remote.path {
                Some(ConflictKind::Move)
            } else {
                None
            }
        }
    }
}

/// Map `old id -> added change` for deletions paired with an addition of a
/// bookmark with the same title in the same folder.
fn url_edits(changes: &[SyncChange]) -> BTreeMap<NodeId, &SyncChange> {
    let mut used: BTreeSet<&NodeId> = BTreeSet::new();
    let mut edits = BTreeMap::new();

    for deleted in changes.iter().filter(|c| c.change_type == ChangeType::Deleted) {
        let Some(before) = deleted.before.as_ref() else {
            continue;
        };
        if before.node_type() != NodeType::Bookmark {
            continue;
        }
        let replacement = changes.iter().find(|c| {
            c.change_type == ChangeType::Added
                && c.path == deleted.path
                && !used.contains(&c.id)
                && c.after.as_ref().is_some_and(|a| {
                    a.node_type() == NodeType::Bookmark && a.title == before.title
                })
        });
        if let Some(added) = replacement {
            used.insert(&added.id);
            edits.insert(deleted.id.clone(), added);
        }
    }
    edits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{BookmarkNode, NodePath, RootKind};
    use chrono::Utc;

    fn change(kind: ChangeType, node: &BookmarkNode, path: NodePath) -> SyncChange {
        let (before, after) = match kind {
            ChangeType::Deleted => (Some(node.clone()), None),
            _ => (None, Some(node.clone())),
        };
        SyncChange {
            id: node.id.clone(),
            change_type: kind,
            path,
            index: 0,
            before,
            after,
            timestamp: Utc::now(),
        }
    }

    fn toolbar() -> NodePath {
        NodePath::root(RootKind::Toolbar)
    }

    #[test]
    fn test_no_conflicts_disjoint() {
        let a = BookmarkNode::bookmark("https://a.com", "A");
        let b = BookmarkNode::bookmark("https://b.com", "B");
        let local = vec![change(ChangeType::Added, &a, toolbar())];
        let remote = vec![change(ChangeType::Added, &b, toolbar())];
        assert!(ConflictDetector::find_conflicts(&local, &remote).is_empty());
    }

    #[test]
    fn test_content_conflict() {
        let a = BookmarkNode::bookmark("https://a.com", "A");
        let mut a2 = a.clone();
        a2.title = "A2".into();
        let local = vec![change(ChangeType::Modified, &a, toolbar())];
        let remote = vec![change(ChangeType::Modified, &a2, toolbar())];
        let conflicts = ConflictDetector::find_conflicts(&local, &remote);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Content);
    }

    #[test]
    fn test_exactly_one_conflict_per_id() {
        let a = BookmarkNode::bookmark("https://a.com", "A");
        let mut a2 = a.clone();
        a2.title = "A2".into();
        let local = vec![
            change(ChangeType::Modified, &a, toolbar()),
            change(ChangeType::Modified, &a, toolbar()),
        ];
        let remote = vec![change(ChangeType::Modified, &a2, toolbar())];
        assert_eq!(ConflictDetector::find_conflicts(&local, &remote).len(), 1);
    }

    #[test]
    fn test_identical_changes_converge() {
        let a = BookmarkNode::bookmark("https://a.com", "A");
        let local = vec![change(ChangeType::Added, &a, toolbar())];
        let remote = vec![change(ChangeType::Added, &a, toolbar())];
        let detection = ConflictDetector::detect(&local, &remote);
        assert!(detection.conflicts.is_empty());
        assert!(detection.converged.contains(&a.id));
    }

    #[test]
    fn test_move_conflict() {
        let a = BookmarkNode::bookmark("https://a.com", "A");
        let local = vec![change(ChangeType::Moved, &a, toolbar().child("X"))];
        let remote = vec![change(ChangeType::Moved, &a, toolbar().child("Y"))];
        let conflicts = ConflictDetector::find_conflicts(&local, &remote);
        assert_eq!(conflicts[0].kind, ConflictKind::Move);
    }

    #[test]
    fn test_edit_delete_conflict() {
        let a = BookmarkNode::bookmark("https://a.com", "A");
        let local = vec![change(ChangeType::Modified, &a, toolbar())];
        let remote = vec![change(ChangeType::Deleted, &a, toolbar())];
        let conflicts = ConflictDetector::find_conflicts(&local, &remote);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].kind,
            ConflictKind::DeleteModify {
                deleted_side: Side::Remote
            }
        );
    }

    #[test]
    fn test_both_deleted_no_conflict() {
        let a = BookmarkNode::bookmark("https://a.com", "A");
        let local = vec![change(ChangeType::Deleted, &a, toolbar())];
        let remote = vec![change(ChangeType::Deleted, &a, toolbar())];
        assert!(ConflictDetector::find_conflicts(&local, &remote).is_empty());
    }

    #[test]
    fn test_divergent_url_edits_flag_old_id() {
        let old = BookmarkNode::bookmark("https://old.com", "Docs");
        let local_new = BookmarkNode::bookmark("https://local.com", "Docs");
        let remote_new = BookmarkNode::bookmark("https://remote.com", "Docs");
        let local = vec![
            change(ChangeType::Added, &local_new, toolbar()),
            change(ChangeType::Deleted, &old, toolbar()),
        ];
        let remote = vec![
            change(ChangeType::Added, &remote_new, toolbar()),
            change(ChangeType::Deleted, &old, toolbar()),
        ];
        let detection = ConflictDetector::detect(&local, &remote);
        assert_eq!(detection.conflicts.len(), 1);
        assert_eq!(detection.conflicts[0].id, old.id);
        assert_eq!(detection.conflicts[0].kind, ConflictKind::UrlDivergence);
        assert!(!detection.converged.contains(&old.id));
    }

    #[test]
    fn test_same_url_edit_on_both_sides_converges() {
        let old = BookmarkNode::bookmark("https://old.com", "Docs");
        let new = BookmarkNode::bookmark("https://new.com", "Docs");
        let changes = vec![
            change(ChangeType::Added, &new, toolbar()),
            change(ChangeType::Deleted, &old, toolbar()),
        ];
        let detection = ConflictDetector::detect(&changes, &changes.clone());
        assert!(detection.conflicts.is_empty());
    }
}
