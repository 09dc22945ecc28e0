//! Canonical XML serialization of document trees.
//!
//! # Responsibility
//! - Write a tree, a subtree, or one node (optionally a selection of it) to
//!   the canonical XML format.
//! - Parse that format back into a detached `DocumentTree`.
//!
//! # Invariants
//! - `deserialize(serialize_tree(t)) == t` for trees without XML-forbidden
//!   control characters.
//! - Parsing never touches a live tree: a fresh tree is built and returned
//!   only when the whole input is valid.
//! - Node ids missing from the input are allocated above every id present.
//!
//! # See also
//! - `content` for the run and embedded object codec.

pub(crate) mod content;

use crate::cancel::CancelToken;
use crate::model::buffer::{BufferError, RichBuffer};
use crate::model::embedded::EmbeddedObject;
use crate::model::node::{Node, NodeId, SyntaxKind};
use crate::tree::{DocumentTree, TreeError, DEFAULT_NODE_NAME};
use crate::xml::{XmlError, XmlEvent, XmlReader, XmlWriter};
use content::{
    attribute, bool_str, build_buffer, is_embedded_element, next_significant, optional_bool,
    optional_number, read_object, read_rich_text, read_text, write_object, write_runs, RICH_TEXT,
};
use log::{info, warn};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::ops::Range;

const ROOT: &str = "notetree";
const NODE: &str = "node";
const BOOKMARKS: &str = "bookmarks";
const SNAPSHOT: &str = "buffer";

pub type SerializeResult<T> = Result<T, SerializeError>;

/// Why an input document was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    Xml(XmlError),
    InvalidUtf8,
    UnexpectedElement(String),
    UnexpectedText,
    MissingAttribute { element: String, attribute: String },
    InvalidAttribute {
        element: String,
        attribute: String,
        value: String,
    },
    UnknownTag(String),
    InvalidPayload(String),
    OffsetCollision(usize),
    OffsetOutOfRange { offset: usize, len: usize },
    DuplicateId(NodeId),
    Buffer(BufferError),
}

impl Display for MalformedReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Xml(err) => write!(f, "{err}"),
            Self::InvalidUtf8 => write!(f, "input is not valid UTF-8"),
            Self::UnexpectedElement(name) => write!(f, "unexpected element `{name}`"),
            Self::UnexpectedText => write!(f, "unexpected character data"),
            Self::MissingAttribute { element, attribute } => {
                write!(f, "`{element}` is missing attribute `{attribute}`")
            }
            Self::InvalidAttribute {
                element,
                attribute,
                value,
            } => write!(f, "`{element}` has invalid `{attribute}` value `{value}`"),
            Self::UnknownTag(name) => write!(f, "tag `{name}` cannot be re-created"),
            Self::InvalidPayload(message) => write!(f, "invalid payload: {message}"),
            Self::OffsetCollision(offset) => {
                write!(f, "two embedded objects at offset {offset}")
            }
            Self::OffsetOutOfRange { offset, len } => {
                write!(f, "embedded object offset {offset} beyond buffer length {len}")
            }
            Self::DuplicateId(id) => write!(f, "duplicate node id {id}"),
            Self::Buffer(err) => write!(f, "{err}"),
        }
    }
}

/// Errors from serialization and deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializeError {
    /// Input is structurally invalid.
    MalformedDocument(MalformedReason),
    /// Requested node does not exist.
    Tree(TreeError),
    /// Caller cancelled between nodes.
    Cancelled,
}

impl Display for SerializeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedDocument(reason) => write!(f, "malformed document: {reason}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Cancelled => write!(f, "serialization cancelled"),
        }
    }
}

impl Error for SerializeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MalformedDocument(MalformedReason::Xml(err)) => Some(err),
            Self::MalformedDocument(MalformedReason::Buffer(err)) => Some(err),
            Self::Tree(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TreeError> for SerializeError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

pub(crate) fn malformed(reason: MalformedReason) -> SerializeError {
    SerializeError::MalformedDocument(reason)
}

/// Serializes the whole document, bookmarks included.
pub fn serialize_tree(tree: &DocumentTree) -> SerializeResult<Vec<u8>> {
    serialize_tree_with_cancel(tree, &CancelToken::new())
}

/// `serialize_tree` polling `cancel` between nodes.
pub fn serialize_tree_with_cancel(
    tree: &DocumentTree,
    cancel: &CancelToken,
) -> SerializeResult<Vec<u8>> {
    let mut writer = XmlWriter::with_declaration();
    writer.start(ROOT, &[]);
    writer.newline();
    for root in tree.roots() {
        write_node(&mut writer, tree, *root, 0, true, cancel)?;
    }
    if !tree.bookmarks().is_empty() {
        let list = tree
            .bookmarks()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        writer.empty(BOOKMARKS, &[("list", Cow::Owned(list))]);
        writer.newline();
    }
    let xml = writer.finish();
    info!(
        "event=serialize_tree module=serialize status=ok nodes={} bytes={}",
        tree.len(),
        xml.len()
    );
    Ok(xml.into_bytes())
}

/// Serializes the subtree rooted at `root`.
pub fn serialize_subtree(tree: &DocumentTree, root: NodeId) -> SerializeResult<Vec<u8>> {
    serialize_subtree_with_cancel(tree, root, &CancelToken::new())
}

/// `serialize_subtree` polling `cancel` between nodes.
pub fn serialize_subtree_with_cancel(
    tree: &DocumentTree,
    root: NodeId,
    cancel: &CancelToken,
) -> SerializeResult<Vec<u8>> {
    tree.node(root)?;
    let mut writer = XmlWriter::with_declaration();
    writer.start(ROOT, &[]);
    writer.newline();
    write_node(&mut writer, tree, root, 0, true, cancel)?;
    Ok(writer.finish().into_bytes())
}

/// Serializes one node without children, limited to `range` when given.
///
/// Embedded object offsets are rebased onto the selection start.
pub fn serialize_node(
    tree: &DocumentTree,
    id: NodeId,
    range: Option<Range<usize>>,
) -> SerializeResult<Vec<u8>> {
    let node = tree.node(id)?;
    if let Some(range) = &range {
        node.buffer
            .check_range(range.start, range.end)
            .map_err(TreeError::Buffer)?;
    }
    let mut writer = XmlWriter::with_declaration();
    writer.start(ROOT, &[]);
    writer.newline();
    write_node_element(&mut writer, node, 0, range)?;
    writer.end();
    writer.newline();
    Ok(writer.finish().into_bytes())
}

fn write_node(
    writer: &mut XmlWriter,
    tree: &DocumentTree,
    id: NodeId,
    level: usize,
    recursive: bool,
    cancel: &CancelToken,
) -> SerializeResult<()> {
    if cancel.is_cancelled() {
        warn!("event=serialize_cancel module=serialize status=cancelled node_id={id}");
        return Err(SerializeError::Cancelled);
    }
    let node = tree.node(id)?;
    write_node_element(writer, node, level, None)?;
    writer.newline();
    if recursive {
        for child in &node.children {
            write_node(writer, tree, *child, level + 1, true, cancel)?;
        }
    }
    writer.end();
    writer.newline();
    Ok(())
}

/// Opens the node element and writes its buffer; the caller closes it.
fn write_node_element(
    writer: &mut XmlWriter,
    node: &Node,
    level: usize,
    range: Option<Range<usize>>,
) -> SerializeResult<()> {
    let tags = node.tags.iter().cloned().collect::<Vec<_>>().join(" ");
    writer.start(
        NODE,
        &[
            ("name", Cow::Borrowed(node.name.as_str())),
            ("unique_id", Cow::Owned(node.id.to_string())),
            ("syntax_highlighting", Cow::Borrowed(node.syntax().as_str())),
            ("level", Cow::Owned(level.to_string())),
            ("tags", Cow::Owned(tags)),
            ("read_only", Cow::Borrowed(bool_str(node.read_only))),
        ],
    );
    let objects = write_runs(writer, &node.buffer, range)?;
    for (offset, object) in objects {
        write_object(writer, offset, object);
    }
    Ok(())
}

/// Parsed node waiting for id assignment.
struct ParsedNode {
    id: Option<NodeId>,
    name: String,
    read_only: bool,
    tags: BTreeSet<String>,
    buffer: RichBuffer,
    children: Vec<ParsedNode>,
}

/// Parses a document into a new, detached tree.
///
/// # Errors
/// - `MalformedDocument` on any structural, attribute or payload problem.
pub fn deserialize(bytes: &[u8]) -> SerializeResult<DocumentTree> {
    let input = std::str::from_utf8(bytes).map_err(|_| malformed(MalformedReason::InvalidUtf8))?;
    let mut reader = XmlReader::new(input);

    match next_significant(&mut reader)? {
        XmlEvent::Start { name: ROOT, .. } => {}
        XmlEvent::Start { name, .. } | XmlEvent::End { name } => {
            return Err(malformed(MalformedReason::UnexpectedElement(name.to_string())))
        }
        XmlEvent::Text(_) => return Err(malformed(MalformedReason::UnexpectedText)),
    }

    let mut roots = Vec::new();
    let mut bookmarks = Vec::new();
    loop {
        match next_significant(&mut reader)? {
            XmlEvent::Start {
                name: NODE,
                attributes,
            } => roots.push(parse_node(&mut reader, &attributes)?),
            XmlEvent::Start {
                name: BOOKMARKS,
                attributes,
            } => {
                bookmarks = parse_bookmarks(&attributes)?;
                read_text(&mut reader, BOOKMARKS)?;
            }
            XmlEvent::End { name: ROOT } => break,
            XmlEvent::Start { name, .. } | XmlEvent::End { name } => {
                return Err(malformed(MalformedReason::UnexpectedElement(name.to_string())))
            }
            XmlEvent::Text(_) => return Err(malformed(MalformedReason::UnexpectedText)),
        }
    }
    if let Some(event) = reader
        .next_event()
        .map_err(|err| malformed(MalformedReason::Xml(err)))?
    {
        let name = match event {
            XmlEvent::Start { name, .. } | XmlEvent::End { name } => name.to_string(),
            XmlEvent::Text(_) => return Err(malformed(MalformedReason::UnexpectedText)),
        };
        return Err(malformed(MalformedReason::UnexpectedElement(name)));
    }

    let tree = build_tree(roots, bookmarks)?;
    info!(
        "event=deserialize module=serialize status=ok nodes={} bytes={}",
        tree.len(),
        bytes.len()
    );
    Ok(tree)
}

fn parse_node(
    reader: &mut XmlReader<'_>,
    attributes: &content::Attributes<'_>,
) -> SerializeResult<ParsedNode> {
    let id = optional_number::<u64>(NODE, attributes, "unique_id")?.map(NodeId);
    let name = attribute(attributes, "name")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_NODE_NAME)
        .to_string();
    let syntax = attribute(attributes, "syntax_highlighting")
        .map(SyntaxKind::parse)
        .unwrap_or_default();
    let read_only = optional_bool(NODE, attributes, "read_only")?.unwrap_or(false);
    let tags = attribute(attributes, "tags")
        .map(|tags| tags.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let mut runs = Vec::new();
    let mut objects: Vec<EmbeddedObject> = Vec::new();
    let mut children = Vec::new();
    loop {
        match next_significant(reader)? {
            XmlEvent::Start {
                name: RICH_TEXT,
                attributes,
            } => runs.push(read_rich_text(reader, &attributes)?),
            XmlEvent::Start {
                name: NODE,
                attributes,
            } => children.push(parse_node(reader, &attributes)?),
            XmlEvent::Start { name, attributes } if is_embedded_element(name) => {
                objects.push(read_object(reader, name, &attributes)?);
            }
            XmlEvent::End { name: NODE } => break,
            XmlEvent::Start { name, .. } | XmlEvent::End { name } => {
                return Err(malformed(MalformedReason::UnexpectedElement(name.to_string())))
            }
            XmlEvent::Text(_) => return Err(malformed(MalformedReason::UnexpectedText)),
        }
    }

    Ok(ParsedNode {
        id,
        name,
        read_only,
        tags,
        buffer: build_buffer(syntax, runs, objects)?,
        children,
    })
}

fn parse_bookmarks(attributes: &content::Attributes<'_>) -> SerializeResult<Vec<NodeId>> {
    let Some(list) = attribute(attributes, "list") else {
        return Ok(Vec::new());
    };
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<u64>().map(NodeId).map_err(|_| {
                malformed(MalformedReason::InvalidAttribute {
                    element: BOOKMARKS.to_string(),
                    attribute: "list".to_string(),
                    value: list.to_string(),
                })
            })
        })
        .collect()
}

fn build_tree(roots: Vec<ParsedNode>, bookmarks: Vec<NodeId>) -> SerializeResult<DocumentTree> {
    let mut explicit = HashSet::new();
    let mut stack: Vec<&ParsedNode> = roots.iter().collect();
    while let Some(parsed) = stack.pop() {
        if let Some(id) = parsed.id {
            if !explicit.insert(id) {
                return Err(malformed(MalformedReason::DuplicateId(id)));
            }
        }
        stack.extend(parsed.children.iter());
    }
    let mut next_free = explicit.iter().map(|id| id.0).max().unwrap_or(0) + 1;

    let mut tree = DocumentTree::new();
    for root in roots {
        insert_parsed(&mut tree, root, None, &mut next_free)?;
    }
    tree.set_bookmarks(bookmarks);
    Ok(tree)
}

fn insert_parsed(
    tree: &mut DocumentTree,
    parsed: ParsedNode,
    parent: Option<NodeId>,
    next_free: &mut u64,
) -> SerializeResult<()> {
    let id = parsed.id.unwrap_or_else(|| {
        let id = NodeId(*next_free);
        *next_free += 1;
        id
    });
    let node = Node {
        id,
        name: parsed.name,
        parent,
        children: Vec::new(),
        read_only: parsed.read_only,
        tags: parsed.tags,
        buffer: parsed.buffer,
    };
    tree.insert_parsed(node, parent).map_err(|err| match err {
        TreeError::IdCollision(id) => malformed(MalformedReason::DuplicateId(id)),
        other => SerializeError::Tree(other),
    })?;
    for child in parsed.children {
        insert_parsed(tree, child, Some(id), next_free)?;
    }
    Ok(())
}

/// Writes a buffer's runs as a standalone fragment and returns its objects
/// with their emitted offsets. Used by undo snapshots, so forbidden
/// characters are kept as references.
pub(crate) fn buffer_to_fragment(buffer: &RichBuffer) -> SerializeResult<(String, Vec<EmbeddedObject>)> {
    let mut writer = XmlWriter::lossless();
    writer.start(SNAPSHOT, &[]);
    let objects = write_runs(&mut writer, buffer, None)?
        .into_iter()
        .map(|(offset, object)| EmbeddedObject {
            offset,
            ..object.clone()
        })
        .collect();
    Ok((writer.finish(), objects))
}

/// Rebuilds a buffer from `buffer_to_fragment` output.
pub(crate) fn buffer_from_fragment(
    syntax: SyntaxKind,
    fragment: &str,
    objects: &[EmbeddedObject],
) -> SerializeResult<RichBuffer> {
    let mut reader = XmlReader::new(fragment);
    match next_significant(&mut reader)? {
        XmlEvent::Start { name: SNAPSHOT, .. } => {}
        XmlEvent::Start { name, .. } | XmlEvent::End { name } => {
            return Err(malformed(MalformedReason::UnexpectedElement(name.to_string())))
        }
        XmlEvent::Text(_) => return Err(malformed(MalformedReason::UnexpectedText)),
    }
    let mut runs = Vec::new();
    loop {
        match next_significant(&mut reader)? {
            XmlEvent::Start {
                name: RICH_TEXT,
                attributes,
            } => runs.push(read_rich_text(&mut reader, &attributes)?),
            XmlEvent::End { name: SNAPSHOT } => break,
            XmlEvent::Start { name, .. } | XmlEvent::End { name } => {
                return Err(malformed(MalformedReason::UnexpectedElement(name.to_string())))
            }
            XmlEvent::Text(_) => return Err(malformed(MalformedReason::UnexpectedText)),
        }
    }
    build_buffer(syntax, runs, objects.to_vec())
}
