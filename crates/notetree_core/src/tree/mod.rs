//! Hierarchical document tree.
//!
//! # Responsibility
//! - Own every node of one document and their parent/child ordering.
//! - Provide add, move, delete, duplicate and syntax-change operations.
//! - Allocate node ids.
//!
//! # Invariants
//! - Node ids are unique and never reused, even after deletion.
//! - `children` order is display order; `roots` holds top-level nodes.
//! - Moves must not create parent-child cycles.
//! - Node names are trimmed and never blank.
//! - Bookmarks only reference live nodes.

use crate::model::buffer::{BufferError, RichBuffer};
use crate::model::node::{Node, NodeId, SyntaxKind};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Name given to nodes created without one.
pub const DEFAULT_NODE_NAME: &str = "Untitled";

pub type TreeResult<T> = Result<T, TreeError>;

/// Errors from document tree operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Target node does not exist.
    NodeNotFound(NodeId),
    /// Move would place a node under itself or its descendant.
    CycleDetected { node: NodeId, parent: NodeId },
    /// `after_sibling` is not a child of the destination parent.
    NotASibling {
        sibling: NodeId,
        parent: Option<NodeId>,
    },
    /// Node name is blank after trim.
    InvalidName,
    /// Code language that reads back as another syntax.
    InvalidSyntax(String),
    /// Syntax change would drop formatting or embedded objects.
    LossyConversion { node: NodeId, objects: usize },
    /// Grafted node id already exists in this tree.
    IdCollision(NodeId),
    /// Buffer-level failure.
    Buffer(BufferError),
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "node not found: {id}"),
            Self::CycleDetected { node, parent } => {
                write!(f, "move would create cycle: node {node} under parent {parent}")
            }
            Self::NotASibling { sibling, parent } => match parent {
                Some(parent) => write!(f, "node {sibling} is not a child of {parent}"),
                None => write!(f, "node {sibling} is not a top-level node"),
            },
            Self::InvalidName => write!(f, "node name must not be blank"),
            Self::InvalidSyntax(language) => {
                write!(f, "`{language}` is not a usable code language")
            }
            Self::LossyConversion { node, objects } => write!(
                f,
                "syntax change of node {node} drops formatting and {objects} embedded objects"
            ),
            Self::IdCollision(id) => write!(f, "node id already in use: {id}"),
            Self::Buffer(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TreeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Buffer(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BufferError> for TreeError {
    fn from(value: BufferError) -> Self {
        Self::Buffer(value)
    }
}

/// How `graft` treats ids of incoming nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    /// Keep ids; colliding ids are rejected.
    Preserve,
    /// Allocate fresh ids and rewrite node links inside the fragment.
    Reassign,
}

/// Arena of nodes forming one document.
///
/// `Clone` is the read-only snapshot handed to exports running elsewhere.
#[derive(Debug, Clone, Default)]
pub struct DocumentTree {
    nodes: BTreeMap<NodeId, Node>,
    roots: Vec<NodeId>,
    next_id: u64,
    bookmarks: Vec<NodeId>,
}

impl PartialEq for DocumentTree {
    /// Structural equality; the id allocator position is not compared.
    fn eq(&self, other: &Self) -> bool {
        self.roots == other.roots && self.nodes == other.nodes && self.bookmarks == other.bookmarks
    }
}

impl DocumentTree {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: NodeId) -> TreeResult<&Node> {
        self.nodes.get(&id).ok_or(TreeError::NodeNotFound(id))
    }

    pub fn buffer(&self, id: NodeId) -> TreeResult<&RichBuffer> {
        self.node(id).map(|node| &node.buffer)
    }

    pub fn buffer_mut(&mut self, id: NodeId) -> TreeResult<&mut RichBuffer> {
        self.node_mut(id).map(|node| &mut node.buffer)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children(&self, id: NodeId) -> TreeResult<&[NodeId]> {
        self.node(id).map(|node| node.children.as_slice())
    }

    pub fn parent(&self, id: NodeId) -> TreeResult<Option<NodeId>> {
        self.node(id).map(|node| node.parent)
    }

    /// Id the next created node will receive.
    pub fn next_id(&self) -> NodeId {
        NodeId(self.next_id.max(1))
    }

    /// Appends a new top-level node.
    pub fn add_top_level(&mut self, name: &str, syntax: SyntaxKind) -> TreeResult<NodeId> {
        let name = normalize_name(name)?;
        check_syntax(&syntax)?;
        let id = self.allocate_id();
        self.nodes.insert(id, Node::new(id, name, syntax));
        self.roots.push(id);
        info!("event=node_add module=tree status=ok node_id={id} parent=none");
        Ok(id)
    }

    /// Inserts a new node directly after `of`, under the same parent.
    pub fn add_sibling(&mut self, of: NodeId, name: &str, syntax: SyntaxKind) -> TreeResult<NodeId> {
        let name = normalize_name(name)?;
        check_syntax(&syntax)?;
        let parent = self.node(of)?.parent;
        let id = self.allocate_id();
        let mut node = Node::new(id, name, syntax);
        node.parent = parent;
        self.nodes.insert(id, node);
        let siblings = self.siblings_mut(parent)?;
        let position = siblings
            .iter()
            .position(|sibling| *sibling == of)
            .map_or(siblings.len(), |index| index + 1);
        siblings.insert(position, id);
        info!("event=node_add module=tree status=ok node_id={id} sibling_of={of}");
        Ok(id)
    }

    /// Appends a new last child under `of`.
    pub fn add_child(&mut self, of: NodeId, name: &str, syntax: SyntaxKind) -> TreeResult<NodeId> {
        let name = normalize_name(name)?;
        check_syntax(&syntax)?;
        self.node(of)?;
        let id = self.allocate_id();
        let mut node = Node::new(id, name, syntax);
        node.parent = Some(of);
        self.nodes.insert(id, node);
        self.node_mut(of)?.children.push(id);
        info!("event=node_add module=tree status=ok node_id={id} parent={of}");
        Ok(id)
    }

    /// Re-parents `id` and places it after `after_sibling` (first when `None`).
    ///
    /// # Errors
    /// - `NodeNotFound` for unknown ids.
    /// - `CycleDetected` when `new_parent` is `id` or one of its descendants.
    /// - `NotASibling` when `after_sibling` is not under `new_parent`.
    pub fn move_node(
        &mut self,
        id: NodeId,
        new_parent: Option<NodeId>,
        after_sibling: Option<NodeId>,
    ) -> TreeResult<()> {
        self.node(id)?;
        if let Some(parent) = new_parent {
            self.node(parent)?;
            self.ensure_no_cycle(id, parent)?;
        }
        if let Some(sibling) = after_sibling {
            let sibling_parent = self.node(sibling)?.parent;
            if sibling_parent != new_parent || sibling == id {
                return Err(TreeError::NotASibling {
                    sibling,
                    parent: new_parent,
                });
            }
        }

        self.detach(id)?;
        let siblings = self.siblings_mut(new_parent)?;
        let position = match after_sibling {
            Some(sibling) => siblings
                .iter()
                .position(|candidate| *candidate == sibling)
                .map_or(siblings.len(), |index| index + 1),
            None => 0,
        };
        siblings.insert(position, id);
        self.node_mut(id)?.parent = new_parent;
        debug!(
            "event=node_move module=tree status=ok node_id={id} parent={} position={position}",
            new_parent.map_or_else(|| "none".to_string(), |parent| parent.to_string())
        );
        Ok(())
    }

    /// Swaps `id` with its previous sibling. Returns `false` when already first.
    pub fn move_up(&mut self, id: NodeId) -> TreeResult<bool> {
        let parent = self.node(id)?.parent;
        let siblings = self.siblings_mut(parent)?;
        match siblings.iter().position(|sibling| *sibling == id) {
            Some(index) if index > 0 => {
                siblings.swap(index, index - 1);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Swaps `id` with its next sibling. Returns `false` when already last.
    pub fn move_down(&mut self, id: NodeId) -> TreeResult<bool> {
        let parent = self.node(id)?.parent;
        let siblings = self.siblings_mut(parent)?;
        match siblings.iter().position(|sibling| *sibling == id) {
            Some(index) if index + 1 < siblings.len() => {
                siblings.swap(index, index + 1);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Detaches and destroys `id` and its whole subtree.
    ///
    /// Returns the removed ids in pre-order so callers can drop per-node
    /// state such as undo histories.
    pub fn delete_node(&mut self, id: NodeId) -> TreeResult<Vec<NodeId>> {
        let removed = self.iter_subtree(id)?;
        self.detach(id)?;
        for node_id in &removed {
            self.nodes.remove(node_id);
        }
        let removed_set: HashSet<NodeId> = removed.iter().copied().collect();
        self.bookmarks.retain(|bookmark| !removed_set.contains(bookmark));
        info!(
            "event=node_delete module=tree status=ok node_id={id} removed={}",
            removed.len()
        );
        Ok(removed)
    }

    /// Converts the node buffer to `new_kind`.
    ///
    /// Leaving rich text keeps the plain text only. Unless `confirm_lossy`
    /// is set, a conversion that would drop tags or embedded objects fails
    /// with `LossyConversion` and changes nothing.
    pub fn change_syntax(
        &mut self,
        id: NodeId,
        new_kind: SyntaxKind,
        confirm_lossy: bool,
    ) -> TreeResult<()> {
        check_syntax(&new_kind)?;
        let node = self.node_mut(id)?;
        if *node.syntax() == new_kind {
            return Ok(());
        }
        let lossy = node.syntax().is_rich_text()
            && !new_kind.is_rich_text()
            && node.buffer.has_rich_content();
        if lossy && !confirm_lossy {
            return Err(TreeError::LossyConversion {
                node: id,
                objects: node.buffer.embedded().len(),
            });
        }
        let from = node.syntax().as_str().to_string();
        node.buffer = node.buffer.converted(new_kind);
        info!(
            "event=node_syntax module=tree status=ok node_id={id} from={from} to={} lossy={lossy}",
            node.syntax().as_str()
        );
        Ok(())
    }

    /// Gives every descendant of `id` the syntax of `id`.
    ///
    /// Returns the ids whose syntax changed.
    pub fn inherit_syntax(&mut self, id: NodeId) -> TreeResult<Vec<NodeId>> {
        let syntax = self.node(id)?.syntax().clone();
        let mut changed = Vec::new();
        for descendant in self.iter_subtree(id)?.into_iter().skip(1) {
            if *self.node(descendant)?.syntax() != syntax {
                self.change_syntax(descendant, syntax.clone(), true)?;
                changed.push(descendant);
            }
        }
        Ok(changed)
    }

    pub fn rename(&mut self, id: NodeId, name: &str) -> TreeResult<()> {
        let name = normalize_name(name)?;
        self.node_mut(id)?.name = name;
        Ok(())
    }

    pub fn set_read_only(&mut self, id: NodeId, read_only: bool) -> TreeResult<()> {
        self.node_mut(id)?.read_only = read_only;
        Ok(())
    }

    /// Replaces the node's tag set. Entries are split on whitespace.
    pub fn set_tags<I, S>(&mut self, id: NodeId, tags: I) -> TreeResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags: BTreeSet<String> = tags
            .into_iter()
            .flat_map(|tag| {
                tag.as_ref()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        self.node_mut(id)?.tags = tags;
        Ok(())
    }

    /// Deep-copies the subtree at `id` with fresh ids, placed right after it.
    pub fn duplicate_node(&mut self, id: NodeId) -> TreeResult<NodeId> {
        let source_ids = self.iter_subtree(id)?;
        let parent = self.node(id)?.parent;
        let mapping: HashMap<NodeId, NodeId> = source_ids
            .iter()
            .map(|source| (*source, self.allocate_id()))
            .collect();
        for source in &source_ids {
            let mut copy = self.node(*source)?.clone();
            copy.id = mapping[source];
            copy.parent = match copy.parent {
                Some(old) if *source != id => mapping.get(&old).copied(),
                _ => parent,
            };
            copy.children = copy
                .children
                .iter()
                .filter_map(|child| mapping.get(child).copied())
                .collect();
            self.nodes.insert(copy.id, copy);
        }
        let duplicate = mapping[&id];
        let siblings = self.siblings_mut(parent)?;
        let position = siblings
            .iter()
            .position(|sibling| *sibling == id)
            .map_or(siblings.len(), |index| index + 1);
        siblings.insert(position, duplicate);
        info!(
            "event=node_duplicate module=tree status=ok node_id={id} copy_id={duplicate} nodes={}",
            source_ids.len()
        );
        Ok(duplicate)
    }

    /// Number of ancestors; top-level nodes are at depth 0.
    pub fn depth(&self, id: NodeId) -> TreeResult<usize> {
        Ok(self.path(id)?.len() - 1)
    }

    /// Ids from the top-level ancestor down to `id`.
    pub fn path(&self, id: NodeId) -> TreeResult<Vec<NodeId>> {
        let mut path = vec![id];
        let mut cursor = self.node(id)?.parent;
        while let Some(parent) = cursor {
            path.push(parent);
            cursor = self.node(parent)?.parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Ancestor names joined by `separator`, ending with the node's own name.
    pub fn hierarchical_name(&self, id: NodeId, separator: &str) -> TreeResult<String> {
        let names = self
            .path(id)?
            .into_iter()
            .map(|node_id| self.node(node_id).map(|node| node.name.as_str()))
            .collect::<TreeResult<Vec<&str>>>()?;
        Ok(names.join(separator))
    }

    /// Pre-order ids of the subtree rooted at `id`, `id` first.
    pub fn iter_subtree(&self, id: NodeId) -> TreeResult<Vec<NodeId>> {
        let mut ordered = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current)?;
            ordered.push(current);
            stack.extend(node.children.iter().rev().copied());
        }
        Ok(ordered)
    }

    /// Pre-order ids of the whole document.
    pub fn iter_all(&self) -> Vec<NodeId> {
        self.roots
            .iter()
            .flat_map(|root| self.iter_subtree(*root).unwrap_or_default())
            .collect()
    }

    pub fn bookmarks(&self) -> &[NodeId] {
        &self.bookmarks
    }

    /// Bookmarks `id`. Returns `false` when already bookmarked.
    pub fn add_bookmark(&mut self, id: NodeId) -> TreeResult<bool> {
        self.node(id)?;
        if self.bookmarks.contains(&id) {
            return Ok(false);
        }
        self.bookmarks.push(id);
        Ok(true)
    }

    pub fn remove_bookmark(&mut self, id: NodeId) -> bool {
        let before = self.bookmarks.len();
        self.bookmarks.retain(|bookmark| *bookmark != id);
        before != self.bookmarks.len()
    }

    /// Moves every node of `fragment` into this tree under `parent`.
    ///
    /// Returns the ids of the grafted top-level nodes in order. Validation
    /// happens before any node is inserted.
    pub fn graft(
        &mut self,
        fragment: DocumentTree,
        parent: Option<NodeId>,
        policy: IdPolicy,
    ) -> TreeResult<Vec<NodeId>> {
        if let Some(parent) = parent {
            self.node(parent)?;
        }
        let DocumentTree {
            nodes,
            roots,
            bookmarks,
            ..
        } = fragment;

        let mapping: HashMap<NodeId, NodeId> = match policy {
            IdPolicy::Preserve => {
                if let Some(id) = nodes.keys().copied().find(|id| self.nodes.contains_key(id)) {
                    return Err(TreeError::IdCollision(id));
                }
                nodes.keys().map(|id| (*id, *id)).collect()
            }
            IdPolicy::Reassign => nodes.keys().map(|id| (*id, self.allocate_id())).collect(),
        };

        for (old_id, mut node) in nodes {
            let new_id = mapping[&old_id];
            node.id = new_id;
            node.parent = match node.parent {
                Some(old_parent) => mapping.get(&old_parent).copied().or(parent),
                None => parent,
            };
            node.children = node
                .children
                .iter()
                .filter_map(|child| mapping.get(child).copied())
                .collect();
            if policy == IdPolicy::Reassign {
                node.buffer.remap_node_links(&mapping);
            }
            self.next_id = self.next_id.max(new_id.0 + 1);
            self.nodes.insert(new_id, node);
        }

        let grafted: Vec<NodeId> = roots.iter().filter_map(|root| mapping.get(root).copied()).collect();
        self.siblings_mut(parent)?.extend(grafted.iter().copied());
        for bookmark in bookmarks.iter().filter_map(|id| mapping.get(id)) {
            if !self.bookmarks.contains(bookmark) {
                self.bookmarks.push(*bookmark);
            }
        }
        info!(
            "event=tree_graft module=tree status=ok roots={} nodes={} policy={policy:?}",
            grafted.len(),
            mapping.len()
        );
        Ok(grafted)
    }

    /// Inserts a fully-built node under `parent`, keeping its id.
    pub(crate) fn insert_parsed(&mut self, mut node: Node, parent: Option<NodeId>) -> TreeResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(TreeError::IdCollision(node.id));
        }
        node.parent = parent;
        node.children.clear();
        let id = node.id;
        self.siblings_mut(parent)?.push(id);
        self.next_id = self.next_id.max(id.0 + 1);
        self.nodes.insert(id, node);
        Ok(())
    }

    pub(crate) fn set_bookmarks(&mut self, bookmarks: Vec<NodeId>) {
        self.bookmarks = bookmarks
            .into_iter()
            .filter(|id| self.nodes.contains_key(id))
            .collect();
    }

    fn node_mut(&mut self, id: NodeId) -> TreeResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(TreeError::NodeNotFound(id))
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        NodeId(id)
    }

    fn siblings_mut(&mut self, parent: Option<NodeId>) -> TreeResult<&mut Vec<NodeId>> {
        match parent {
            Some(parent) => self.node_mut(parent).map(|node| &mut node.children),
            None => Ok(&mut self.roots),
        }
    }

    fn detach(&mut self, id: NodeId) -> TreeResult<()> {
        let parent = self.node(id)?.parent;
        self.siblings_mut(parent)?.retain(|sibling| *sibling != id);
        Ok(())
    }

    fn ensure_no_cycle(&self, id: NodeId, new_parent: NodeId) -> TreeResult<()> {
        let mut visited = HashSet::new();
        let mut cursor = Some(new_parent);
        while let Some(current) = cursor {
            if current == id {
                return Err(TreeError::CycleDetected {
                    node: id,
                    parent: new_parent,
                });
            }
            if !visited.insert(current) {
                break;
            }
            cursor = self.node(current)?.parent;
        }
        Ok(())
    }
}

fn check_syntax(syntax: &SyntaxKind) -> TreeResult<()> {
    if syntax.is_valid() {
        return Ok(());
    }
    Err(TreeError::InvalidSyntax(syntax.as_str().to_string()))
}

fn normalize_name(name: &str) -> TreeResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TreeError::InvalidName);
    }
    Ok(trimmed.to_string())
}
