//! Tree merge engine.
//!
//! Builds the next snapshot by applying remote changes and conflict
//! resolutions onto a copy of the local tree. Inputs are never mutated.
//!
//! Application order matters: upserts go parent-first (ascending path depth,
//! then sibling index) so a folder exists before its children land in it;
//! deletions go last, deepest first, so a deleted folder only ever contains
//! survivors when it is removed.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::resolver::{Resolution, SyncConflict};
use crate::diff::SyncChange;
use crate::errors::MergeError;
use crate::tree::{BookmarkNode, BookmarkTree, NodeId, NodeKind, NodePath};

/// Insert-or-replace of one node at a location.
#[derive(Debug)]
struct Upsert {
    node: BookmarkNode,
    path: NodePath,
    index: usize,
    /// Bring along folder children that are not already in the tree.
    adopt_children: bool,
}

#[derive(Debug)]
struct Deletion {
    id: NodeId,
    depth: usize,
}

/// Stateless merge engine.
pub struct Merger;

impl Merger {
    /// Merge remote changes and resolved conflicts into a copy of `local`.
    ///
    /// Remote changes to ids that are conflicted, or that the local side
    /// changed identically, are skipped; conflicted ids take their resolved
    /// value instead. Manual conflicts keep the local state.
    pub fn merge(
        local: &BookmarkTree,
        remote: &BookmarkTree,
        local_changes: &[SyncChange],
        remote_changes: &[SyncChange],
        conflicts: &[SyncConflict],
    ) -> Result<BookmarkTree, MergeError> {
        let conflicted: BTreeSet<&NodeId> = conflicts.iter().map(|c| &c.id).collect();
        let locally_changed: BTreeSet<&NodeId> = local_changes.iter().map(|c| &c.id).collect();

        let mut upserts = Vec::new();
        let mut deletions = Vec::new();
        let mut skipped = 0usize;

        for change in remote_changes {
            if conflicted.contains(&change.id) || locally_changed.contains(&change.id) {
                skipped += 1;
                continue;
            }
            plan_change(change, &mut upserts, &mut deletions);
        }

        for conflict in conflicts {
            plan_resolution(conflict, &mut upserts, &mut deletions);
        }

        info!(
            remote_node_count = remote.node_count(),
            upserts = upserts.len(),
            deletions = deletions.len(),
            skipped,
            "merging trees"
        );

        let mut merged = local.clone();
        apply(&mut merged, upserts, deletions)?;
        merged.validate()?;
        Ok(merged)
    }

    /// Apply every change in `changes` to a copy of `tree`, without any
    /// conflict filtering.
    pub fn apply_changes(
        tree: &BookmarkTree,
        changes: &[SyncChange],
    ) -> Result<BookmarkTree, MergeError> {
        let mut upserts = Vec::new();
        let mut deletions = Vec::new();
        for change in changes {
            plan_change(change, &mut upserts, &mut deletions);
        }

        let mut result = tree.clone();
        apply(&mut result, upserts, deletions)?;
        result.validate()?;
        Ok(result)
    }
}

fn plan_change(change: &SyncChange, upserts: &mut Vec<Upsert>, deletions: &mut Vec<Deletion>) {
    match &change.after {
        Some(node) => upserts.push(Upsert {
            node: node.clone(),
            path: change.path.clone(),
            index: change.index,
            adopt_children: false,
        }),
        None => deletions.push(Deletion {
            id: change.id.clone(),
            depth: change.path.depth(),
        }),
    }
}

fn plan_resolution(conflict: &SyncConflict, upserts: &mut Vec<Upsert>, deletions: &mut Vec<Deletion>) {
    if conflict.resolution == Resolution::Delete {
        let depth = [&conflict.local_change, &conflict.remote_change]
            .into_iter()
            .find(|c| c.is_deletion())
            .map_or(0, |c| c.path.depth());
        deletions.push(Deletion {
            id: conflict.id.clone(),
            depth,
        });
        return;
    }

    let (Some(value), Some(at)) = (&conflict.resolved_value, conflict.placement_change()) else {
        debug!(id = %conflict.id, resolution = %conflict.resolution, "nothing to apply");
        return;
    };
    upserts.push(Upsert {
        node: value.clone(),
        path: at.path.clone(),
        index: at.index,
        adopt_children: true,
    });
}

fn apply(
    tree: &mut BookmarkTree,
    mut upserts: Vec<Upsert>,
    mut deletions: Vec<Deletion>,
) -> Result<(), MergeError> {
    upserts.sort_by_key(|u| (u.path.depth(), u.index));
    deletions.sort_by(|a, b| b.depth.cmp(&a.depth));

    for upsert in upserts {
        debug!(id = %upsert.node.id, path = %upsert.path, index = upsert.index, "upsert");
        apply_upsert(tree, upsert)?;
    }
    for deletion in deletions {
        debug!(id = %deletion.id, "delete");
        apply_deletion(tree, &deletion.id)?;
    }
    Ok(())
}

fn apply_upsert(tree: &mut BookmarkTree, upsert: Upsert) -> Result<(), MergeError> {
    let Upsert {
        mut node,
        path,
        index,
        adopt_children,
    } = upsert;

    let existing = tree.remove(&node.id).map(|(_, _, n)| n);

    if let NodeKind::Folder { children: incoming } = &mut node.kind {
        let incoming = std::mem::take(incoming);
        let mut children = match existing.map(|n| n.kind) {
            Some(NodeKind::Folder { children }) => children,
            _ => Vec::new(),
        };

        if adopt_children {
            let mut present = tree_ids(tree);
            collect_ids(&children, &mut present);
            for mut child in incoming {
                if present.contains(&child.id) {
                    continue;
                }
                prune_present(&mut child, &present);
                collect_ids(std::slice::from_ref(&child), &mut present);
                children.push(child);
            }
        }
        node.kind = NodeKind::Folder { children };
    }

    let siblings = tree
        .ensure_path(&path)
        .ok_or_else(|| MergeError::ParentNotFolder {
            path: path.to_string(),
        })?;
    let at = index.min(siblings.len());
    siblings.insert(at, node);
    Ok(())
}

/// Remove `id`; a removed folder's remaining children take its place.
fn apply_deletion(tree: &mut BookmarkTree, id: &NodeId) -> Result<(), MergeError> {
    let Some((path, index, node)) = tree.remove(id) else {
        return Ok(());
    };

    if let NodeKind::Folder { children } = node.kind {
        if !children.is_empty() {
            debug!(id = %id, lifted = children.len(), "lifting children of deleted folder");
            let siblings = tree
                .ensure_path(&path)
                .ok_or_else(|| MergeError::ParentNotFolder {
                    path: path.to_string(),
                })?;
            let at = index.min(siblings.len());
            siblings.splice(at..at, children);
        }
    }
    Ok(())
}

fn tree_ids(tree: &BookmarkTree) -> BTreeSet<NodeId> {
    let mut ids = BTreeSet::new();
    tree.walk(|node, _, _| {
        ids.insert(node.id.clone());
    });
    ids
}

fn collect_ids(nodes: &[BookmarkNode], ids: &mut BTreeSet<NodeId>) {
    for node in nodes {
        ids.insert(node.id.clone());
        if let Some(children) = node.children() {
            collect_ids(children, ids);
        }
    }
}

/// Drop descendants of `node` whose ids already exist elsewhere.
fn prune_present(node: &mut BookmarkNode, present: &BTreeSet<NodeId>) {
    if let Some(children) = node.children_mut() {
        children.retain(|c| !present.contains(&c.id));
        for child in children.iter_mut() {
            prune_present(child, present);
        }
    }
}
