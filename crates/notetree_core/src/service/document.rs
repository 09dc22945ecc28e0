//! Editing session over one document.
//!
//! # Responsibility
//! - Route every buffer edit through a pre-edit snapshot and the node's
//!   undo history.
//! - Keep the session tag table in step with the tags buffers use.
//! - Drop per-node state when nodes leave the tree.
//!
//! # Invariants
//! - A failed edit leaves both the buffer and its history untouched.
//! - Read-only nodes reject buffer edits, undo and redo.
//! - A corrupt snapshot never replaces the live buffer.
//! - Histories exist only for nodes present in the tree.

use crate::cancel::CancelToken;
use crate::config::{ConfigError, EngineConfig};
use crate::export::{
    ExportError, ExportScope, Exporter, HtmlExport, HtmlExporter, PlainTextExport,
    PlainTextExporter, PrintExport, PrintExporter,
};
use crate::history::{EditKind, Snapshot, SnapshotError, UndoHistory, VisitedNodes};
use crate::model::buffer::{BufferError, BufferResult, DeletedSlice, RichBuffer, TagChange};
use crate::model::embedded::{EmbeddedKind, EmbeddedObject, Justification};
use crate::model::node::{NodeId, SyntaxKind};
use crate::model::tag::{TagError, TagTable};
use crate::serialize::{
    deserialize, serialize_node, serialize_subtree, serialize_tree_with_cancel, SerializeError,
};
use crate::tree::{DocumentTree, IdPolicy, TreeError};
use log::{debug, info};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::ops::Range;

pub type SessionResult<T> = Result<T, SessionError>;

/// Errors from session operations.
#[derive(Debug)]
pub enum SessionError {
    /// Node is marked read-only.
    ReadOnly(NodeId),
    Tree(TreeError),
    Buffer(BufferError),
    Tag(TagError),
    Snapshot(SnapshotError),
    Serialize(SerializeError),
    Export(ExportError),
    Config(ConfigError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly(id) => write!(f, "node {id} is read-only"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Buffer(err) => write!(f, "{err}"),
            Self::Tag(err) => write!(f, "{err}"),
            Self::Snapshot(err) => write!(f, "{err}"),
            Self::Serialize(err) => write!(f, "{err}"),
            Self::Export(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadOnly(_) => None,
            Self::Tree(err) => Some(err),
            Self::Buffer(err) => Some(err),
            Self::Tag(err) => Some(err),
            Self::Snapshot(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::Export(err) => Some(err),
            Self::Config(err) => Some(err),
        }
    }
}

impl From<TreeError> for SessionError {
    fn from(value: TreeError) -> Self {
        match value {
            TreeError::Buffer(err) => Self::Buffer(err),
            other => Self::Tree(other),
        }
    }
}

impl From<BufferError> for SessionError {
    fn from(value: BufferError) -> Self {
        Self::Buffer(value)
    }
}

impl From<TagError> for SessionError {
    fn from(value: TagError) -> Self {
        Self::Tag(value)
    }
}

impl From<SnapshotError> for SessionError {
    fn from(value: SnapshotError) -> Self {
        Self::Snapshot(value)
    }
}

impl From<SerializeError> for SessionError {
    fn from(value: SerializeError) -> Self {
        Self::Serialize(value)
    }
}

impl From<ExportError> for SessionError {
    fn from(value: ExportError) -> Self {
        Self::Export(value)
    }
}

impl From<ConfigError> for SessionError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Document editing facade.
#[derive(Debug)]
pub struct DocumentSession {
    tree: DocumentTree,
    tags: TagTable,
    histories: HashMap<NodeId, UndoHistory>,
    cursors: HashMap<NodeId, usize>,
    visited: VisitedNodes,
    config: EngineConfig,
}

impl DocumentSession {
    /// Starts an empty document.
    pub fn new(config: EngineConfig) -> SessionResult<Self> {
        Self::from_tree(DocumentTree::new(), config)
    }

    /// Wraps an existing tree, registering every tag its buffers use.
    pub fn from_tree(tree: DocumentTree, config: EngineConfig) -> SessionResult<Self> {
        config.validate()?;
        let mut session = Self {
            tree,
            tags: TagTable::new(),
            histories: HashMap::new(),
            cursors: HashMap::new(),
            visited: VisitedNodes::new(),
            config,
        };
        for id in session.tree.iter_all() {
            session.register_buffer_tags(id)?;
        }
        info!(
            "event=session_open module=service status=ok nodes={} tags={}",
            session.tree.len(),
            session.tags.len()
        );
        Ok(session)
    }

    /// Parses a serialized document into a new session.
    pub fn open(bytes: &[u8], config: EngineConfig) -> SessionResult<Self> {
        let tree = deserialize(bytes)?;
        Self::from_tree(tree, config)
    }

    pub fn tree(&self) -> &DocumentTree {
        &self.tree
    }

    pub fn tags(&self) -> &TagTable {
        &self.tags
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the configuration, re-limiting every live history.
    pub fn set_config(&mut self, config: EngineConfig) -> SessionResult<()> {
        config.validate()?;
        for history in self.histories.values_mut() {
            history.set_limit(config.limit_undoable_steps);
        }
        self.config = config;
        Ok(())
    }

    pub fn history(&self, id: NodeId) -> Option<&UndoHistory> {
        self.histories.get(&id)
    }

    /// Last known cursor of `id`; 0 before the first edit.
    pub fn cursor(&self, id: NodeId) -> usize {
        self.cursors.get(&id).copied().unwrap_or(0)
    }

    pub fn set_cursor(&mut self, id: NodeId, cursor: usize) -> SessionResult<()> {
        let len = self.tree.buffer(id)?.len();
        if cursor > len {
            return Err(SessionError::Buffer(BufferError::OutOfRange {
                start: cursor,
                end: cursor,
                len,
            }));
        }
        self.cursors.insert(id, cursor);
        Ok(())
    }

    // Structure

    pub fn add_top_level(&mut self, name: &str, syntax: SyntaxKind) -> SessionResult<NodeId> {
        Ok(self.tree.add_top_level(name, syntax)?)
    }

    pub fn add_child(
        &mut self,
        of: NodeId,
        name: &str,
        syntax: SyntaxKind,
    ) -> SessionResult<NodeId> {
        Ok(self.tree.add_child(of, name, syntax)?)
    }

    pub fn add_sibling(
        &mut self,
        of: NodeId,
        name: &str,
        syntax: SyntaxKind,
    ) -> SessionResult<NodeId> {
        Ok(self.tree.add_sibling(of, name, syntax)?)
    }

    pub fn move_node(
        &mut self,
        id: NodeId,
        new_parent: Option<NodeId>,
        after_sibling: Option<NodeId>,
    ) -> SessionResult<()> {
        Ok(self.tree.move_node(id, new_parent, after_sibling)?)
    }

    pub fn move_up(&mut self, id: NodeId) -> SessionResult<bool> {
        Ok(self.tree.move_up(id)?)
    }

    pub fn move_down(&mut self, id: NodeId) -> SessionResult<bool> {
        Ok(self.tree.move_down(id)?)
    }

    /// Deletes the subtree at `id` and forgets its histories and visits.
    pub fn delete_node(&mut self, id: NodeId) -> SessionResult<Vec<NodeId>> {
        let removed = self.tree.delete_node(id)?;
        for node_id in &removed {
            self.histories.remove(node_id);
            self.cursors.remove(node_id);
        }
        self.visited.prune(&removed);
        Ok(removed)
    }

    pub fn rename(&mut self, id: NodeId, name: &str) -> SessionResult<()> {
        Ok(self.tree.rename(id, name)?)
    }

    pub fn set_read_only(&mut self, id: NodeId, read_only: bool) -> SessionResult<()> {
        Ok(self.tree.set_read_only(id, read_only)?)
    }

    pub fn set_tags<I, S>(&mut self, id: NodeId, tags: I) -> SessionResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.tree.set_tags(id, tags)?)
    }

    pub fn duplicate_node(&mut self, id: NodeId) -> SessionResult<NodeId> {
        Ok(self.tree.duplicate_node(id)?)
    }

    pub fn add_bookmark(&mut self, id: NodeId) -> SessionResult<bool> {
        Ok(self.tree.add_bookmark(id)?)
    }

    pub fn remove_bookmark(&mut self, id: NodeId) -> bool {
        self.tree.remove_bookmark(id)
    }

    /// Converts the node's syntax. The node's history is cleared because
    /// its snapshots belong to the old syntax.
    pub fn change_syntax(
        &mut self,
        id: NodeId,
        new_kind: SyntaxKind,
        confirm_lossy: bool,
    ) -> SessionResult<()> {
        self.ensure_writable(id)?;
        self.tree.change_syntax(id, new_kind, confirm_lossy)?;
        self.reset_node_state(id)?;
        Ok(())
    }

    /// Gives every descendant the syntax of `id`.
    pub fn inherit_syntax(&mut self, id: NodeId) -> SessionResult<Vec<NodeId>> {
        let changed = self.tree.inherit_syntax(id)?;
        for node_id in &changed {
            self.reset_node_state(*node_id)?;
        }
        Ok(changed)
    }

    // Buffer edits

    /// Inserts untagged `text` at `offset`; a run crossing `offset` is split.
    ///
    /// A single character coalesces with neighbouring keystrokes; a newline
    /// starts its own undo entry; longer text is one structural edit.
    pub fn insert_text(
        &mut self,
        id: NodeId,
        offset: usize,
        text: &str,
    ) -> SessionResult<Range<usize>> {
        let kind = classify_text(text);
        let inserted = self.edit(id, kind, offset, |buffer| buffer.insert(offset, text))?;
        self.cursors.insert(id, inserted.end);
        Ok(inserted)
    }

    /// Deletes `start..end`. One removed character counts as a keystroke.
    pub fn delete_text(
        &mut self,
        id: NodeId,
        start: usize,
        end: usize,
    ) -> SessionResult<DeletedSlice> {
        let kind = classify_text(&self.tree.buffer(id)?.text(start, end)?);
        let slice = self.edit(id, kind, end, |buffer| buffer.delete(start, end))?;
        self.cursors.insert(id, start);
        Ok(slice)
    }

    /// Inserts a previously cut slice, keeping its tags and objects.
    pub fn paste_slice(
        &mut self,
        id: NodeId,
        offset: usize,
        slice: &DeletedSlice,
    ) -> SessionResult<Range<usize>> {
        for run in &slice.runs {
            for tag in &run.tags {
                self.tags.lookup_or_create_name(tag)?;
            }
        }
        let inserted = self.edit(id, EditKind::Structural, offset, |buffer| {
            buffer.insert_slice(offset, slice)
        })?;
        self.cursors.insert(id, inserted.end);
        Ok(inserted)
    }

    pub fn apply_tag(
        &mut self,
        id: NodeId,
        name: &str,
        start: usize,
        end: usize,
    ) -> SessionResult<TagChange> {
        self.tags.lookup_or_create_name(name)?;
        self.edit(id, EditKind::Structural, end, |buffer| {
            buffer.apply_tag(name, start, end)
        })
    }

    /// Applies `name` to the word under `cursor` (or its paragraph for
    /// justification).
    pub fn apply_tag_at_cursor(
        &mut self,
        id: NodeId,
        name: &str,
        cursor: usize,
    ) -> SessionResult<TagChange> {
        self.tags.lookup_or_create_name(name)?;
        self.edit(id, EditKind::Structural, cursor, |buffer| {
            buffer.apply_tag_at_cursor(name, cursor)
        })
    }

    pub fn remove_tag(
        &mut self,
        id: NodeId,
        name: &str,
        start: usize,
        end: usize,
    ) -> SessionResult<()> {
        self.edit(id, EditKind::Structural, end, |buffer| {
            buffer.remove_tag(name, start, end)
        })
    }

    pub fn remove_all_tags(&mut self, id: NodeId, start: usize, end: usize) -> SessionResult<()> {
        self.edit(id, EditKind::Structural, end, |buffer| {
            buffer.remove_all_tags(start, end)
        })
    }

    pub fn place_embedded(
        &mut self,
        id: NodeId,
        offset: usize,
        kind: EmbeddedKind,
        justification: Justification,
    ) -> SessionResult<()> {
        self.edit(id, EditKind::Structural, offset, |buffer| {
            buffer.place_embedded(offset, kind, justification)
        })?;
        self.cursors.insert(id, offset + 1);
        Ok(())
    }

    pub fn remove_embedded(&mut self, id: NodeId, offset: usize) -> SessionResult<EmbeddedObject> {
        let object = self.edit(id, EditKind::Structural, offset + 1, |buffer| {
            buffer.remove_embedded(offset)
        })?;
        self.cursors.insert(id, offset);
        Ok(object)
    }

    pub fn replace_embedded(
        &mut self,
        id: NodeId,
        offset: usize,
        kind: EmbeddedKind,
    ) -> SessionResult<EmbeddedKind> {
        self.edit(id, EditKind::Structural, offset, |buffer| {
            buffer.replace_embedded(offset, kind)
        })
    }

    // History

    /// Ends the node's current keystroke run.
    pub fn flush(&mut self, id: NodeId) {
        if let Some(history) = self.histories.get_mut(&id) {
            history.flush();
        }
    }

    pub fn flush_all(&mut self) {
        for history in self.histories.values_mut() {
            history.flush();
        }
    }

    /// Restores the previous state of `id`.
    ///
    /// Returns the restored cursor, or `None` when there is nothing to undo.
    pub fn undo(&mut self, id: NodeId) -> SessionResult<Option<usize>> {
        self.step(id, Direction::Back)
    }

    /// Re-applies the last undone state of `id`.
    pub fn redo(&mut self, id: NodeId) -> SessionResult<Option<usize>> {
        self.step(id, Direction::Forward)
    }

    // Navigation

    /// Makes `id` the current node, ending the previous node's keystroke run.
    pub fn select_node(&mut self, id: NodeId) -> SessionResult<()> {
        self.tree.node(id)?;
        if let Some(previous) = self.visited.current() {
            self.flush(previous);
        }
        self.visited.visit(id);
        Ok(())
    }

    pub fn current_node(&self) -> Option<NodeId> {
        self.visited.current()
    }

    pub fn go_back(&mut self) -> Option<NodeId> {
        self.visited.back()
    }

    pub fn go_forward(&mut self) -> Option<NodeId> {
        self.visited.forward()
    }

    pub fn visited(&self) -> &VisitedNodes {
        &self.visited
    }

    // Persistence

    /// Serializes the whole document. Every keystroke run ends here.
    pub fn save(&mut self) -> SessionResult<Vec<u8>> {
        self.save_with_cancel(&CancelToken::new())
    }

    pub fn save_with_cancel(&mut self, cancel: &CancelToken) -> SessionResult<Vec<u8>> {
        self.flush_all();
        Ok(serialize_tree_with_cancel(&self.tree, cancel)?)
    }

    pub fn serialize_subtree(&self, root: NodeId) -> SessionResult<Vec<u8>> {
        Ok(serialize_subtree(&self.tree, root)?)
    }

    pub fn serialize_node(
        &self,
        id: NodeId,
        range: Option<Range<usize>>,
    ) -> SessionResult<Vec<u8>> {
        Ok(serialize_node(&self.tree, id, range)?)
    }

    /// Parses `bytes` and grafts the result under `parent`.
    pub fn import(
        &mut self,
        bytes: &[u8],
        parent: Option<NodeId>,
        policy: IdPolicy,
    ) -> SessionResult<Vec<NodeId>> {
        let fragment = deserialize(bytes)?;
        let grafted = self.tree.graft(fragment, parent, policy)?;
        for root in &grafted {
            for id in self.tree.iter_subtree(*root)? {
                self.register_buffer_tags(id)?;
            }
        }
        info!(
            "event=session_import module=service status=ok roots={} policy={policy:?}",
            grafted.len()
        );
        Ok(grafted)
    }

    // Export

    pub fn export_html(
        &self,
        scope: &ExportScope,
        cancel: &CancelToken,
    ) -> SessionResult<HtmlExport> {
        Ok(HtmlExporter::new(self.config.html.clone()).export(&self.tree, scope, cancel)?)
    }

    pub fn export_plain_text(
        &self,
        scope: &ExportScope,
        cancel: &CancelToken,
    ) -> SessionResult<PlainTextExport> {
        Ok(PlainTextExporter::new(self.config.plain_text.clone())
            .export(&self.tree, scope, cancel)?)
    }

    pub fn export_print(
        &self,
        scope: &ExportScope,
        cancel: &CancelToken,
    ) -> SessionResult<PrintExport> {
        Ok(PrintExporter::new(self.config.print.clone()).export(&self.tree, scope, cancel)?)
    }

    fn ensure_writable(&self, id: NodeId) -> SessionResult<()> {
        if self.tree.node(id)?.read_only {
            return Err(SessionError::ReadOnly(id));
        }
        Ok(())
    }

    /// Snapshots the buffer, runs `apply`, and records the snapshot only
    /// when `apply` succeeds.
    fn edit<T>(
        &mut self,
        id: NodeId,
        kind: EditKind,
        cursor: usize,
        apply: impl FnOnce(&mut RichBuffer) -> BufferResult<T>,
    ) -> SessionResult<T> {
        self.ensure_writable(id)?;
        let buffer = self.tree.buffer_mut(id)?;
        let snapshot = Snapshot::take(buffer, cursor)?;
        let value = apply(buffer)?;
        let limit = self.config.limit_undoable_steps;
        let pushed = self
            .histories
            .entry(id)
            .or_insert_with(|| UndoHistory::new(limit))
            .capture(kind, snapshot);
        debug!(
            "event=session_edit module=service status=ok node_id={id} kind={kind:?} pushed={pushed}"
        );
        Ok(value)
    }

    fn step(&mut self, id: NodeId, direction: Direction) -> SessionResult<Option<usize>> {
        self.ensure_writable(id)?;
        let cursor = self.cursor(id);
        let Some(history) = self.histories.get_mut(&id) else {
            return Ok(None);
        };
        let buffer = self.tree.buffer_mut(id)?;
        let current = Snapshot::take(buffer, cursor)?;
        let target = match direction {
            Direction::Back => history.undo(current),
            Direction::Forward => history.redo(current),
        };
        let Some(target) = target else {
            return Ok(None);
        };
        match target.restore() {
            Ok(restored) => {
                *buffer = restored;
                self.cursors.insert(id, target.cursor);
                info!(
                    "event=history_step module=service status=ok node_id={id} direction={direction:?} cursor={}",
                    target.cursor
                );
                Ok(Some(target.cursor))
            }
            Err(err) => {
                // Put the stacks back the way they were.
                match direction {
                    Direction::Back => history.redo(target),
                    Direction::Forward => history.undo(target),
                };
                Err(err.into())
            }
        }
    }

    fn reset_node_state(&mut self, id: NodeId) -> SessionResult<()> {
        if let Some(history) = self.histories.get_mut(&id) {
            history.clear();
        }
        self.cursors.remove(&id);
        self.register_buffer_tags(id)
    }

    fn register_buffer_tags(&mut self, id: NodeId) -> SessionResult<()> {
        let buffer = self.tree.buffer(id)?;
        for run in buffer.runs() {
            for tag in &run.tags {
                self.tags.lookup_or_create_name(tag)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Back,
    Forward,
}

fn classify_text(text: &str) -> EditKind {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some('\n'), None) => EditKind::ParagraphBreak,
        (Some(_), None) => EditKind::Keystroke,
        _ => EditKind::Structural,
    }
}
