//! Canonical in-memory bookmark tree.
//!
//! A [`BookmarkTree`] has exactly three roots (toolbar, menu, other), each a
//! folder with a fixed id. Nodes are owned recursively; merges rebuild a
//! fresh tree rather than mutating a shared one, so no parent links are kept.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{HashError, TreeError};
use crate::hasher::{self, Checksum, IdentityKey};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable, content-derived node identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the three fixed root folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootKind {
    Toolbar,
    Menu,
    Other,
}

impl RootKind {
    pub const ALL: [RootKind; 3] = [RootKind::Toolbar, RootKind::Menu, RootKind::Other];

    /// Path segment used for this root.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Toolbar => "toolbar",
            Self::Menu => "menu",
            Self::Other => "other",
        }
    }

    /// Fixed id of the root folder.
    pub fn id(&self) -> NodeId {
        NodeId::new(format!("root_{}", self.name()))
    }

    /// Default display title of the root folder.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Toolbar => "Bookmarks Toolbar",
            Self::Menu => "Bookmarks Menu",
            Self::Other => "Other Bookmarks",
        }
    }
}

impl fmt::Display for RootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Root-qualified location of a folder, rendered as slash-joined titles.
///
/// Segments are kept separately so titles containing `/` never split.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePath {
    pub root: RootKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<String>,
}

impl NodePath {
    pub fn root(root: RootKind) -> Self {
        Self {
            root,
            segments: Vec::new(),
        }
    }

    /// Path of the folder titled `title` directly under this one.
    pub fn child(&self, title: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(title.to_string());
        Self {
            root: self.root,
            segments,
        }
    }

    /// Number of folders below the root.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Whether `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &NodePath) -> bool {
        self.root == other.root && other.segments.starts_with(&self.segments)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.root.name())?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Discriminant of a node, used for change equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Bookmark,
    Folder,
    Separator,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bookmark => write!(f, "bookmark"),
            Self::Folder => write!(f, "folder"),
            Self::Separator => write!(f, "separator"),
        }
    }
}

/// Extended payload written by satellite features (tagging, link checking).
///
/// Carried through diff and merge untouched and never compared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extended {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

impl Extended {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.notes.is_none()
            && self.link_status.is_none()
            && self.last_checked.is_none()
    }
}

/// Type-specific part of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Bookmark {
        url: String,
    },
    Folder {
        #[serde(default)]
        children: Vec<BookmarkNode>,
    },
    Separator,
}

/// A bookmark, folder or separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkNode {
    pub id: NodeId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Extended::is_empty")]
    pub extended: Extended,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl BookmarkNode {
    /// A bookmark whose id is derived from its URL.
    pub fn bookmark(url: impl Into<String>, title: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: hasher::identity(IdentityKey::Bookmark { url: &url }),
            title: title.into(),
            date_added: Some(Utc::now()),
            date_modified: None,
            extended: Extended::default(),
            kind: NodeKind::Bookmark { url },
        }
    }

    /// A folder under `parent` whose id is derived from the path and title.
    pub fn folder(parent: &NodePath, title: impl Into<String>, children: Vec<BookmarkNode>) -> Self {
        let title = title.into();
        let path = parent.to_string();
        Self {
            id: hasher::identity(IdentityKey::Folder {
                path: &path,
                title: &title,
            }),
            title,
            date_added: Some(Utc::now()),
            date_modified: None,
            extended: Extended::default(),
            kind: NodeKind::Folder { children },
        }
    }

    /// A separator at `position` inside `parent`.
    pub fn separator(parent: &NodePath, position: usize) -> Self {
        let path = parent.to_string();
        Self {
            id: hasher::identity(IdentityKey::Separator {
                path: &path,
                position,
            }),
            title: String::new(),
            date_added: Some(Utc::now()),
            date_modified: None,
            extended: Extended::default(),
            kind: NodeKind::Separator,
        }
    }

    fn root_folder(root: RootKind) -> Self {
        Self {
            id: root.id(),
            title: root.title().to_string(),
            date_added: None,
            date_modified: None,
            extended: Extended::default(),
            kind: NodeKind::Folder {
                children: Vec::new(),
            },
        }
    }

    /// Builder-style timestamp override.
    pub fn with_dates(
        mut self,
        added: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        self.date_added = added;
        self.date_modified = modified;
        self
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Bookmark { .. } => NodeType::Bookmark,
            NodeKind::Folder { .. } => NodeType::Folder,
            NodeKind::Separator => NodeType::Separator,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Bookmark { url } => Some(url),
            _ => None,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder { .. })
    }

    pub fn children(&self) -> Option<&[BookmarkNode]> {
        match &self.kind {
            NodeKind::Folder { children } => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<BookmarkNode>> {
        match &mut self.kind {
            NodeKind::Folder { children } => Some(children),
            _ => None,
        }
    }

    /// Most recent known timestamp: `date_modified`, else `date_added`.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.date_modified.or(self.date_added)
    }

    /// Equality on the fields change detection cares about: type, title, url.
    pub fn same_content(&self, other: &BookmarkNode) -> bool {
        self.node_type() == other.node_type() && self.title == other.title && self.url() == other.url()
    }

    /// Copy of this node with folder children dropped.
    pub fn shallow(&self) -> BookmarkNode {
        let kind = match &self.kind {
            NodeKind::Folder { .. } => NodeKind::Folder {
                children: Vec::new(),
            },
            other => other.clone(),
        };
        BookmarkNode {
            id: self.id.clone(),
            title: self.title.clone(),
            date_added: self.date_added,
            date_modified: self.date_modified,
            extended: self.extended.clone(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// A complete snapshot with the three fixed roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkTree {
    pub toolbar: BookmarkNode,
    pub menu: BookmarkNode,
    pub other: BookmarkNode,
}

impl Default for BookmarkTree {
    fn default() -> Self {
        Self::empty()
    }
}

impl BookmarkTree {
    /// A tree with three empty roots.
    pub fn empty() -> Self {
        Self {
            toolbar: BookmarkNode::root_folder(RootKind::Toolbar),
            menu: BookmarkNode::root_folder(RootKind::Menu),
            other: BookmarkNode::root_folder(RootKind::Other),
        }
    }

    pub fn root(&self, kind: RootKind) -> &BookmarkNode {
        match kind {
            RootKind::Toolbar => &self.toolbar,
            RootKind::Menu => &self.menu,
            RootKind::Other => &self.other,
        }
    }

    pub fn root_mut(&mut self, kind: RootKind) -> &mut BookmarkNode {
        match kind {
            RootKind::Toolbar => &mut self.toolbar,
            RootKind::Menu => &mut self.menu,
            RootKind::Other => &mut self.other,
        }
    }

    pub fn roots(&self) -> impl Iterator<Item = (RootKind, &BookmarkNode)> {
        RootKind::ALL.into_iter().map(move |kind| (kind, self.root(kind)))
    }

    /// Canonical checksum of the whole tree.
    pub fn checksum(&self) -> Result<Checksum, HashError> {
        hasher::checksum(self)
    }

    /// Pre-order traversal of every non-root node with its parent path and
    /// sibling index.
    pub fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(&BookmarkNode, &NodePath, usize),
    {
        for (kind, root) in self.roots() {
            if let Some(children) = root.children() {
                walk_children(children, &NodePath::root(kind), &mut visit);
            }
        }
    }

    /// Number of non-root nodes.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(|_, _, _| count += 1);
        count
    }

    /// Number of leaf bookmarks.
    pub fn bookmark_count(&self) -> usize {
        let mut count = 0;
        self.walk(|node, _, _| {
            if node.node_type() == NodeType::Bookmark {
                count += 1;
            }
        });
        count
    }

    /// Whether a node with `id` exists (roots included).
    pub fn contains(&self, id: &NodeId) -> bool {
        self.find(id).is_some()
    }

    /// Locate a node by id anywhere in the tree (roots included).
    pub fn find(&self, id: &NodeId) -> Option<&BookmarkNode> {
        self.roots().find_map(|(_, root)| find_in(root, id))
    }

    /// Children of the folder at `path`, walking folder titles.
    pub fn children_at_mut(&mut self, path: &NodePath) -> Option<&mut Vec<BookmarkNode>> {
        let mut current = self.root_mut(path.root).children_mut()?;
        for segment in &path.segments {
            let next = current
                .iter_mut()
                .find(|n| n.is_folder() && n.title == *segment)?;
            current = next.children_mut()?;
        }
        Some(current)
    }

    /// Like [`children_at_mut`](Self::children_at_mut) but creates any
    /// missing folders along the way. Returns `None` only if the root itself
    /// is not a folder.
    pub fn ensure_path(&mut self, path: &NodePath) -> Option<&mut Vec<BookmarkNode>> {
        let mut parent = NodePath::root(path.root);
        let mut current = self.root_mut(path.root).children_mut()?;
        for segment in &path.segments {
            let pos = match current
                .iter()
                .position(|n| n.is_folder() && n.title == *segment)
            {
                Some(pos) => pos,
                None => {
                    current.push(BookmarkNode::folder(&parent, segment.clone(), Vec::new()));
                    current.len() - 1
                }
            };
            parent = parent.child(segment);
            current = current[pos].children_mut()?;
        }
        Some(current)
    }

    /// Detach the node with `id`, returning its parent path, former index
    /// and the node itself. Roots cannot be removed.
    pub fn remove(&mut self, id: &NodeId) -> Option<(NodePath, usize, BookmarkNode)> {
        for kind in RootKind::ALL {
            let path = NodePath::root(kind);
            if let Some(children) = self.root_mut(kind).children_mut() {
                if let Some(found) = remove_in(children, &path, id) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Structural validation: fixed roots and globally unique ids.
    pub fn validate(&self) -> Result<(), TreeError> {
        let mut seen: BTreeMap<NodeId, String> = BTreeMap::new();
        for (kind, root) in self.roots() {
            if !root.is_folder() {
                return Err(TreeError::InvalidRoot {
                    root: kind.name().into(),
                    detail: format!("expected folder, found {}", root.node_type()),
                });
            }
            if root.id != kind.id() {
                return Err(TreeError::InvalidRoot {
                    root: kind.name().into(),
                    detail: format!("expected id '{}', found '{}'", kind.id(), root.id),
                });
            }
            seen.insert(root.id.clone(), kind.name().to_string());
        }

        let mut duplicate: Option<TreeError> = None;
        self.walk(|node, path, _| {
            if duplicate.is_some() {
                return;
            }
            let here = format!("{path}/{}", node.title);
            if let Some(first) = seen.insert(node.id.clone(), here.clone()) {
                duplicate = Some(TreeError::DuplicateId {
                    id: node.id.to_string(),
                    first,
                    second: here,
                });
            }
        });
        match duplicate {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn walk_children<F>(children: &[BookmarkNode], path: &NodePath, visit: &mut F)
where
    F: FnMut(&BookmarkNode, &NodePath, usize),
{
    for (index, child) in children.iter().enumerate() {
        visit(child, path, index);
        if let Some(grandchildren) = child.children() {
            walk_children(grandchildren, &path.child(&child.title), visit);
        }
    }
}

fn find_in<'a>(node: &'a BookmarkNode, id: &NodeId) -> Option<&'a BookmarkNode> {
    if node.id == *id {
        return Some(node);
    }
    node.children()?
        .iter()
        .find_map(|child| find_in(child, id))
}

fn remove_in(
    children: &mut Vec<BookmarkNode>,
    path: &NodePath,
    id: &NodeId,
) -> Option<(NodePath, usize, BookmarkNode)> {
    if let Some(pos) = children.iter().position(|c| c.id == *id) {
        return Some((path.clone(), pos, children.remove(pos)));
    }
    for child in children.iter_mut() {
        let child_path = path.child(&child.title);
        if let Some(grandchildren) = child.children_mut() {
            if let Some(found) = remove_in(grandchildren, &child_path, id) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> BookmarkTree {
        let mut tree = BookmarkTree::empty();
        let toolbar = NodePath::root(RootKind::Toolbar);
        let dev = toolbar.child("Dev");
        tree.toolbar.children_mut().unwrap().extend([
            BookmarkNode::bookmark("https://a.com", "A"),
            BookmarkNode::folder(
                &toolbar,
                "Dev",
                vec![
                    BookmarkNode::bookmark("https://rust-lang.org", "Rust"),
                    BookmarkNode::separator(&dev, 1),
                ],
            ),
        ]);
        tree
    }

    #[test]
    fn test_empty_tree_is_valid() {
        BookmarkTree::empty().validate().unwrap();
        assert_eq!(BookmarkTree::empty().node_count(), 0);
    }

    #[test]
    fn test_counts() {
        let tree = sample_tree();
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.bookmark_count(), 2);
    }

    #[test]
    fn test_title_edit_keeps_bookmark_identity() {
        let a = BookmarkNode::bookmark("https://a.com", "A");
        let b = BookmarkNode::bookmark("https://a.com", "Renamed");
        let c = BookmarkNode::bookmark("https://b.com", "A");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut tree = sample_tree();
        tree.menu
            .children_mut()
            .unwrap()
            .push(BookmarkNode::bookmark("https://a.com", "again"));
        assert!(matches!(tree.validate(), Err(TreeError::DuplicateId { .. })));
    }

    #[test]
    fn test_wrong_root_id_rejected() {
        let mut tree = BookmarkTree::empty();
        tree.menu.id = NodeId::new("something-else");
        assert!(matches!(tree.validate(), Err(TreeError::InvalidRoot { .. })));
    }

    #[test]
    fn test_walk_reports_paths_and_indices() {
        let tree = sample_tree();
        let mut seen = Vec::new();
        tree.walk(|node, path, index| seen.push((node.title.clone(), path.to_string(), index)));
        assert_eq!(seen[0], ("A".to_string(), "toolbar".to_string(), 0));
        assert_eq!(seen[2], ("Rust".to_string(), "toolbar/Dev".to_string(), 0));
    }

    #[test]
    fn test_remove_and_find() {
        let mut tree = sample_tree();
        let rust = BookmarkNode::bookmark("https://rust-lang.org", "Rust").id;
        assert!(tree.contains(&rust));
        let (path, index, node) = tree.remove(&rust).unwrap();
        assert_eq!(path.to_string(), "toolbar/Dev");
        assert_eq!(index, 0);
        assert_eq!(node.title, "Rust");
        assert!(!tree.contains(&rust));
    }

    #[test]
    fn test_ensure_path_creates_missing_folders() {
        let mut tree = BookmarkTree::empty();
        let path = NodePath::root(RootKind::Menu).child("Work").child("Docs");
        tree.ensure_path(&path).unwrap().push(BookmarkNode::bookmark("https://d.com", "D"));
        assert_eq!(tree.node_count(), 3);
        assert!(tree.children_at_mut(&path).is_some());
        tree.validate().unwrap();
    }

    #[test]
    fn test_serde_round_trip_keeps_extended_payload() {
        let mut tree = sample_tree();
        let first = &mut tree.toolbar.children_mut().unwrap()[0];
        first.extended.tags = vec!["news".into()];
        first.extended.link_status = Some("ok".into());

        let json = serde_json::to_string(&tree).unwrap();
        assert!(json.contains("\"type\":\"bookmark\""));
        assert!(json.contains("\"linkStatus\":\"ok\""));
        let back: BookmarkTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn test_path_display_and_prefix() {
        let base = NodePath::root(RootKind::Other).child("a");
        let deeper = base.child("b");
        assert_eq!(deeper.to_string(), "other/a/b");
        assert!(base.is_prefix_of(&deeper));
        assert!(!deeper.is_prefix_of(&base));
        assert_eq!(deeper.depth(), 2);
    }
}
