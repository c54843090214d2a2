//! Conflict resolution strategies.
//!
//! The [`ConflictResolver`] turns a [`ConflictPair`] into a [`SyncConflict`]
//! carrying the value the merge engine should apply. Resolution is pure and
//! deterministic: the same pair and strategy always produce the same winner
//! on every device.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::detector::{ConflictKind, ConflictPair, Side};
use crate::diff::SyncChange;
use crate::tree::{BookmarkNode, NodeId, NodeKind};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Default strategy for content and move conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Keep the local version.
    Local,
    /// Keep the remote version.
    Remote,
    /// Field-level structural merge.
    Merged,
    /// Keep the version with the later timestamp; local wins ties.
    #[default]
    Newest,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
            Self::Merged => write!(f, "merged"),
            Self::Newest => write!(f, "newest"),
        }
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "merged" => Ok(Self::Merged),
            "newest" => Ok(Self::Newest),
            other => Err(format!("unknown resolution strategy '{other}'")),
        }
    }
}

/// Strategy for delete-vs-modify conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteResolution {
    /// The modification wins and the node survives.
    #[default]
    Keep,
    /// The deletion wins.
    Delete,
}

impl fmt::Display for DeleteResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => write!(f, "keep"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for DeleteResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(Self::Keep),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown delete resolution '{other}'")),
        }
    }
}

/// How a conflict was actually settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Local,
    Remote,
    Merged,
    Keep,
    Delete,
    /// Not auto-resolved; left for a human to choose.
    Manual,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
            Self::Merged => write!(f, "merged"),
            Self::Keep => write!(f, "keep"),
            Self::Delete => write!(f, "delete"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A resolved (or flagged) conflict, ready for the merge engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: NodeId,
    pub kind: ConflictKind,
    pub local_change: SyncChange,
    pub remote_change: SyncChange,
    pub resolution: Resolution,
    /// Node to place in the merged tree; `None` when the node should be
    /// absent or nothing is to be applied.
    pub resolved_value: Option<BookmarkNode>,
    /// Side whose change location (path, index) the resolved value takes.
    pub placement: Option<Side>,
    /// Set when a human should review or override the outcome.
    pub requires_manual_resolution: bool,
}

impl SyncConflict {
    pub fn is_auto_resolved(&self) -> bool {
        self.resolution != Resolution::Manual
    }

    /// The change whose location the resolved value should occupy.
    pub fn placement_change(&self) -> Option<&SyncChange> {
        match self.placement? {
            Side::Local => Some(&self.local_change),
            Side::Remote => Some(&self.remote_change),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Stateless conflict resolution operations.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve every pair with the same strategies.
    pub fn resolve_all(
        pairs: Vec<ConflictPair>,
        strategy: ResolutionStrategy,
        delete_resolution: DeleteResolution,
    ) -> Vec<SyncConflict> {
        let conflicts: Vec<SyncConflict> = pairs
            .into_iter()
            .map(|pair| Self::resolve_conflict(pair, strategy, delete_resolution))
            .collect();
        let manual = conflicts.iter().filter(|c| c.requires_manual_resolution).count();
        info!(
            total = conflicts.len(),
            manual,
            %strategy,
            "conflicts resolved"
        );
        conflicts
    }

    /// Resolve a single pair.
    ///
    /// Delete-vs-modify pairs use `delete_resolution` and are flagged for
    /// review either way; divergent URL edits are never auto-resolved.
    pub fn resolve_conflict(
        pair: ConflictPair,
        strategy: ResolutionStrategy,
        delete_resolution: DeleteResolution,
    ) -> SyncConflict {
        let (resolution, resolved_value, placement, manual) = match pair.kind {
            ConflictKind::UrlDivergence => {
                warn!(id = %pair.id, "divergent url edits require manual resolution");
                (Resolution::Manual, None, None, true)
            }
            ConflictKind::DeleteModify { deleted_side } => {
                let modifying_side = match deleted_side {
                    Side::Local => Side::Remote,
                    Side::Remote => Side::Local,
                };
                match delete_resolution {
                    DeleteResolution::Keep => {
                        let value = side_change(&pair, modifying_side).after.clone();
                        (Resolution::Keep, value, Some(modifying_side), true)
                    }
                    DeleteResolution::Delete => (Resolution::Delete, None, None, true),
                }
            }
            ConflictKind::Content | ConflictKind::Move => {
                Self::resolve_with_strategy(&pair, strategy, Utc::now())
            }
        };

        debug!(id = %pair.id, kind = %pair.kind, %resolution, "conflict resolved");
        SyncConflict {
            id: pair.id,
            kind: pair.kind,
            local_change: pair.local,
            remote_change: pair.remote,
            resolution,
            resolved_value,
            placement,
            requires_manual_resolution: manual,
        }
    }

    fn resolve_with_strategy(
        pair: &ConflictPair,
        strategy: ResolutionStrategy,
        now: DateTime<Utc>,
    ) -> (Resolution, Option<BookmarkNode>, Option<Side>, bool) {
        let (Some(local), Some(remote)) = (&pair.local.after, &pair.remote.after) else {
            return (Resolution::Manual, None, None, true);
        };

        match strategy {
            ResolutionStrategy::Local => (Resolution::Local, Some(local.clone()), Some(Side::Local), false),
            ResolutionStrategy::Remote => {
                (Resolution::Remote, Some(remote.clone()), Some(Side::Remote), false)
            }
            ResolutionStrategy::Newest => match newer_side(&pair.local, &pair.remote) {
                Side::Local => (Resolution::Local, Some(local.clone()), Some(Side::Local), false),
                Side::Remote => (Resolution::Remote, Some(remote.clone()), Some(Side::Remote), false),
            },
            ResolutionStrategy::Merged => {
                let base = newer_side(&pair.local, &pair.remote);
                let merged = Self::merge_nodes(local, remote, base, now);
                (Resolution::Merged, Some(merged), Some(base), false)
            }
        }
    }

    /// Structural field-level merge of two versions of the same node.
    ///
    /// The `base` side's node is kept; the other side's title is used only if
    /// the base title is empty. Folder children are unioned by id with local
    /// entries first and remote-only entries appended.
    pub fn merge_nodes(
        local: &BookmarkNode,
        remote: &BookmarkNode,
        base: Side,
        now: DateTime<Utc>,
    ) -> BookmarkNode {
        let (mut merged, other) = match base {
            Side::Local => (local.clone(), remote),
            Side::Remote => (remote.clone(), local),
        };

        if merged.title.is_empty() {
            merged.title = other.title.clone();
        }

        if let (Some(local_children), Some(remote_children)) = (local.children(), remote.children()) {
            let known: BTreeSet<&NodeId> = local_children.iter().map(|c| &c.id).collect();
            let mut children = local_children.to_vec();
            children.extend(
                remote_children
                    .iter()
                    .filter(|c| !known.contains(&c.id))
                    .cloned(),
            );
            if merged.is_folder() {
                merged.kind = NodeKind::Folder { children };
            }
        }

        merged.date_modified = Some(now);
        merged
    }
}

fn side_change(pair: &ConflictPair, side: Side) -> &SyncChange {
    match side {
        Side::Local => &pair.local,
        Side::Remote => &pair.remote,
    }
}

/// Later timestamp wins; equal timestamps go to local on every device.
fn newer_side(local: &SyncChange, remote: &SyncChange) -> Side {
    if remote.timestamp > local.timestamp {
        Side::Remote
    } else {
        Side::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeType;
    use crate::tree::{NodePath, RootKind};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn modified(node: &BookmarkNode, at: i64) -> SyncChange {
        SyncChange {
            id: node.id.clone(),
            change_type: ChangeType::Modified,
            path: NodePath::root(RootKind::Toolbar),
            index: 0,
            before: None,
            after: Some(node.clone()),
            timestamp: ts(at),
        }
    }

    fn deleted(node: &BookmarkNode) -> SyncChange {
        SyncChange {
            change_type: ChangeType::Deleted,
            before: Some(node.clone()),
            after: None,
            ..modified(node, 0)
        }
    }

    fn titled(title: &str) -> BookmarkNode {
        BookmarkNode::bookmark("https://k.com", title)
    }

    fn content_pair(local_title: &str, local_ts: i64, remote_title: &str, remote_ts: i64) -> ConflictPair {
        let local = titled(local_title);
        let remote = titled(remote_title);
        ConflictPair {
            id: local.id.clone(),
            kind: ConflictKind::Content,
            local: modified(&local, local_ts),
            remote: modified(&remote, remote_ts),
        }
    }

    fn resolve(pair: ConflictPair, strategy: ResolutionStrategy) -> SyncConflict {
        ConflictResolver::resolve_conflict(pair, strategy, DeleteResolution::Keep)
    }

    #[test]
    fn test_local_and_remote_strategies() {
        let c = resolve(content_pair("L", 1, "R", 2), ResolutionStrategy::Local);
        assert_eq!(c.resolution, Resolution::Local);
        assert_eq!(c.resolved_value.unwrap().title, "L");

        let c = resolve(content_pair("L", 1, "R", 2), ResolutionStrategy::Remote);
        assert_eq!(c.resolution, Resolution::Remote);
        assert_eq!(c.resolved_value.unwrap().title, "R");
        assert!(!c.requires_manual_resolution);
    }

    #[test]
    fn test_newest_picks_later_timestamp() {
        let c = resolve(content_pair("L", 1, "R", 2), ResolutionStrategy::Newest);
        assert_eq!(c.resolved_value.unwrap().title, "R");
        let c = resolve(content_pair("L", 3, "R", 2), ResolutionStrategy::Newest);
        assert_eq!(c.resolved_value.unwrap().title, "L");
    }

    #[test]
    fn test_newest_tie_goes_to_local_deterministically() {
        let first = resolve(content_pair("L", 5, "R", 5), ResolutionStrategy::Newest);
        let second = resolve(content_pair("L", 5, "R", 5), ResolutionStrategy::Newest);
        assert_eq!(first.resolution, Resolution::Local);
        assert_eq!(first, second);
    }

    #[test]
    fn test_merged_fills_empty_title_from_other_side() {
        let c = resolve(content_pair("", 9, "Remote title", 1), ResolutionStrategy::Merged);
        assert_eq!(c.resolution, Resolution::Merged);
        assert_eq!(c.placement, Some(Side::Local));
        let value = c.resolved_value.unwrap();
        assert_eq!(value.title, "Remote title");
        assert!(value.date_modified.is_some());
    }

    #[test]
    fn test_merged_unions_folder_children() {
        let toolbar = NodePath::root(RootKind::Toolbar);
        let a = BookmarkNode::bookmark("https://a.com", "A");
        let b = BookmarkNode::bookmark("https://b.com", "B");
        let c = BookmarkNode::bookmark("https://c.com", "C");
        let mut a_remote = a.clone();
        a_remote.title = "A remote".into();

        let local = BookmarkNode::folder(&toolbar, "F", vec![a.clone(), b.clone()]);
        let remote = BookmarkNode::folder(&toolbar, "F", vec![c.clone(), a_remote]);

        let merged = ConflictResolver::merge_nodes(&local, &remote, Side::Remote, ts(10));
        let titles: Vec<_> = merged.children().unwrap().iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
        assert_eq!(merged.date_modified, Some(ts(10)));
    }

    #[test]
    fn test_delete_modify_keep_and_delete() {
        let node = titled("K");
        let pair = ConflictPair {
            id: node.id.clone(),
            kind: ConflictKind::DeleteModify {
                deleted_side: Side::Remote,
            },
            local: modified(&node, 1),
            remote: deleted(&node),
        };

        let kept = ConflictResolver::resolve_conflict(
            pair.clone(),
            ResolutionStrategy::Remote,
            DeleteResolution::Keep,
        );
        assert_eq!(kept.resolution, Resolution::Keep);
        assert_eq!(kept.placement, Some(Side::Local));
        assert!(kept.resolved_value.is_some());
        assert!(kept.requires_manual_resolution);

        let removed =
            ConflictResolver::resolve_conflict(pair, ResolutionStrategy::Local, DeleteResolution::Delete);
        assert_eq!(removed.resolution, Resolution::Delete);
        assert!(removed.resolved_value.is_none());
    }

    #[test]
    fn test_url_divergence_is_manual() {
        let mut pair = content_pair("L", 1, "R", 2);
        pair.kind = ConflictKind::UrlDivergence;
        let c = resolve(pair, ResolutionStrategy::Newest);
        assert_eq!(c.resolution, Resolution::Manual);
        assert!(!c.is_auto_resolved());
        assert!(c.resolved_value.is_none());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("newest".parse::<ResolutionStrategy>().unwrap(), ResolutionStrategy::Newest);
        assert!("oldest".parse::<ResolutionStrategy>().is_err());
        assert_eq!("delete".parse::<DeleteResolution>().unwrap(), DeleteResolution::Delete);
    }
}
