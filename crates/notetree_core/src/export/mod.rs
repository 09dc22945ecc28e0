//! Derived export formats.
//!
//! # Responsibility
//! - Turn `walk_slots` spans into an ordered `InlineLayer` list shared by
//!   every exporter.
//! - Resolve node links and collect dangling references.
//! - Select the nodes an export covers and name their output files.
//!
//! # Invariants
//! - Layer order, outermost to innermost: italic, bold, heading, link,
//!   styled span, monospace, superscript/subscript.
//! - A node that fails to render yields a placeholder; the export goes on.
//! - Cancellation is checked between nodes only.
//!
//! # See also
//! - `html`, `plain`, `print` for the three renderers.

pub mod html;
pub mod plain;
pub mod print;

use crate::cancel::CancelToken;
use crate::model::buffer::BufferError;
use crate::model::node::NodeId;
use crate::model::tag::{LinkTarget, TagProperty};
use crate::model::walk::{SlotWalk, Span};
use crate::tree::{DocumentTree, TreeError};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::ops::Range;

pub use html::{HtmlExport, HtmlExporter, HtmlPage, ImageFile};
pub use plain::{PlainDocument, PlainTextExport, PlainTextExporter};
pub use print::{PrintExport, PrintExporter};

/// Longest file name an export produces, extension included.
pub const MAX_FILE_NAME_LEN: usize = 142;

static FILENAME_DROP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[*?:<>|"\r\n]"#).expect("valid filename drop regex"));
static FILENAME_SLASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/\\]").expect("valid filename slash regex"));

pub type ExportResult<T> = Result<T, ExportError>;

/// Errors from export runs and single-node rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    Tree(TreeError),
    Buffer(BufferError),
    /// Caller cancelled between nodes.
    Cancelled,
}

impl Display for ExportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(err) => write!(f, "{err}"),
            Self::Buffer(err) => write!(f, "{err}"),
            Self::Cancelled => write!(f, "export cancelled"),
        }
    }
}

impl Error for ExportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Tree(err) => Some(err),
            Self::Buffer(err) => Some(err),
            Self::Cancelled => None,
        }
    }
}

impl From<TreeError> for ExportError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

impl From<BufferError> for ExportError {
    fn from(value: BufferError) -> Self {
        Self::Buffer(value)
    }
}

/// Why a node link could not be followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DanglingReason {
    MissingNode,
    MissingAnchor(String),
}

/// One unresolvable node link, rendered as plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    pub source: NodeId,
    pub offset: usize,
    pub target: LinkTarget,
    pub reason: DanglingReason,
}

impl Display for DanglingReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            DanglingReason::MissingNode => write!(
                f,
                "node {} offset {}: link to missing node ({})",
                self.source,
                self.offset,
                self.target.display_text()
            ),
            DanglingReason::MissingAnchor(anchor) => write!(
                f,
                "node {} offset {}: link to missing anchor `{anchor}` ({})",
                self.source,
                self.offset,
                self.target.display_text()
            ),
        }
    }
}

/// Node that rendered as an error placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: NodeId,
    pub error: ExportError,
}

/// Non-fatal findings of one export run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub dangling: Vec<DanglingReference>,
    pub failures: Vec<NodeFailure>,
}

impl ExportReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty() && self.failures.is_empty()
    }

    fn record_failure(&mut self, node: NodeId, error: ExportError) {
        warn!("event=export_node module=export status=error node_id={node} error={error}");
        self.failures.push(NodeFailure { node, error });
    }
}

/// Which nodes an export covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportScope {
    /// Every node, pre-order.
    All,
    /// The subtree rooted at the node, pre-order.
    Subtree(NodeId),
    /// One node, optionally limited to a selection.
    Node {
        id: NodeId,
        range: Option<Range<usize>>,
    },
}

impl ExportScope {
    fn nodes(&self, tree: &DocumentTree) -> ExportResult<Vec<(NodeId, Option<Range<usize>>)>> {
        Ok(match self {
            Self::All => tree.iter_all().into_iter().map(|id| (id, None)).collect(),
            Self::Subtree(root) => tree
                .iter_subtree(*root)?
                .into_iter()
                .map(|id| (id, None))
                .collect(),
            Self::Node { id, range } => {
                tree.node(*id)?;
                vec![(*id, range.clone())]
            }
        })
    }
}

/// Common entry point of the three exporters.
pub trait Exporter {
    type Output;

    /// Renders `scope` of `tree`.
    ///
    /// # Errors
    /// - `Tree` when the scope names a missing node.
    /// - `Cancelled` when `cancel` fires between nodes.
    fn export(
        &self,
        tree: &DocumentTree,
        scope: &ExportScope,
        cancel: &CancelToken,
    ) -> ExportResult<Self::Output>;
}

/// Visits the scope's nodes in order, polling `cancel` before each.
pub(crate) fn for_each_node<F>(
    tree: &DocumentTree,
    scope: &ExportScope,
    cancel: &CancelToken,
    mut visit: F,
) -> ExportResult<()>
where
    F: FnMut(NodeId, Option<Range<usize>>) -> ExportResult<()>,
{
    for (id, range) in scope.nodes(tree)? {
        if cancel.is_cancelled() {
            warn!("event=export_cancel module=export status=cancelled node_id={id}");
            return Err(ExportError::Cancelled);
        }
        visit(id, range)?;
    }
    Ok(())
}

/// Body of one node ready for rendering.
pub(crate) enum NodeContent<'t> {
    Rich(SlotWalk<'t>),
    /// Plain-text or code node; `language` is `None` for plain text.
    Code {
        language: Option<String>,
        text: String,
    },
}

pub(crate) fn node_content<'t>(
    tree: &'t DocumentTree,
    id: NodeId,
    range: Option<Range<usize>>,
) -> ExportResult<NodeContent<'t>> {
    let buffer = tree.buffer(id)?;
    if buffer.syntax().is_rich_text() {
        return Ok(NodeContent::Rich(buffer.walk_slots(range)?));
    }
    let range = range.unwrap_or(0..buffer.len());
    let language = match buffer.syntax() {
        crate::model::node::SyntaxKind::Code(language) => Some(language.clone()),
        _ => None,
    };
    Ok(NodeContent::Code {
        language,
        text: buffer.text(range.start, range.end)?,
    })
}

/// Colour and decoration attributes rendered as one styled span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanStyle {
    pub foreground: Option<String>,
    pub background: Option<String>,
    pub underline: bool,
    pub strikethrough: bool,
    pub small: bool,
}

impl SpanStyle {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Inline formatting wrapper, listed outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineLayer {
    Italic,
    Bold,
    Heading(u8),
    Link(LinkTarget),
    Styled(SpanStyle),
    Monospace,
    Superscript,
    Subscript,
}

/// Layers of `span` in nesting order, independent of tag application order.
pub fn inline_layers(span: &Span) -> Vec<InlineLayer> {
    let mut layers = Vec::new();
    let scale = span.attribute(TagProperty::Scale);
    if span.attribute(TagProperty::Style).is_some() {
        layers.push(InlineLayer::Italic);
    }
    if span.attribute(TagProperty::Weight).is_some() {
        layers.push(InlineLayer::Bold);
    }
    match scale {
        Some("h1") => layers.push(InlineLayer::Heading(1)),
        Some("h2") => layers.push(InlineLayer::Heading(2)),
        Some("h3") => layers.push(InlineLayer::Heading(3)),
        _ => {}
    }
    if let Some(target) = span.attribute(TagProperty::Link).and_then(LinkTarget::parse) {
        layers.push(InlineLayer::Link(target));
    }
    let style = SpanStyle {
        foreground: span.attribute(TagProperty::Foreground).map(rgb_to_24),
        background: span.attribute(TagProperty::Background).map(rgb_to_24),
        underline: span.attribute(TagProperty::Underline).is_some(),
        strikethrough: span.attribute(TagProperty::Strikethrough).is_some(),
        small: scale == Some("small"),
    };
    if !style.is_empty() {
        layers.push(InlineLayer::Styled(style));
    }
    if span.attribute(TagProperty::Family).is_some() {
        layers.push(InlineLayer::Monospace);
    }
    match scale {
        Some("sup") => layers.push(InlineLayer::Superscript),
        Some("sub") => layers.push(InlineLayer::Subscript),
        _ => {}
    }
    layers
}

/// Converts `#rrrrggggbbbb` to `#rrggbb`; other values pass through.
pub fn rgb_to_24(color: &str) -> String {
    let hex = color.trim_start_matches('#');
    if hex.len() == 12 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return format!("#{}{}{}", &hex[0..2], &hex[4..6], &hex[8..10]);
    }
    color.to_string()
}

/// Follows node links against the exported tree.
pub(crate) struct LinkResolver<'t> {
    tree: &'t DocumentTree,
}

impl<'t> LinkResolver<'t> {
    pub(crate) fn new(tree: &'t DocumentTree) -> Self {
        Self { tree }
    }

    /// Returns `true` when `target` can be followed. Dangling node links are
    /// recorded in `report`.
    pub(crate) fn check(
        &self,
        source: NodeId,
        offset: usize,
        target: &LinkTarget,
        report: &mut ExportReport,
    ) -> bool {
        let LinkTarget::Node { id, anchor } = target else {
            return true;
        };
        let reason = match self.tree.get(*id) {
            None => Some(DanglingReason::MissingNode),
            Some(node) => anchor.as_ref().and_then(|anchor| {
                let known: HashSet<String> = node
                    .buffer
                    .embedded()
                    .anchors()
                    .map(|(_, name)| name.to_string())
                    .chain(node.buffer.headings().into_iter().map(|heading| heading.anchor))
                    .collect();
                (!known.contains(anchor)).then(|| DanglingReason::MissingAnchor(anchor.clone()))
            }),
        };
        match reason {
            None => true,
            Some(reason) => {
                warn!(
                    "event=export_link module=export status=dangling node_id={source} offset={offset} target_id={id}"
                );
                report.dangling.push(DanglingReference {
                    source,
                    offset,
                    target: target.clone(),
                    reason,
                });
                false
            }
        }
    }
}

/// Removes characters not allowed in file names; spaces become `_`.
pub fn clean_filename(name: &str) -> String {
    let name = FILENAME_SLASH_RE.replace_all(name, "-");
    let name = FILENAME_DROP_RE.replace_all(&name, "");
    name.trim().replace(' ', "_")
}

/// `Parent--Child.<extension>` for `id`, keeping the last
/// `MAX_FILE_NAME_LEN` characters.
pub fn node_filename(tree: &DocumentTree, id: NodeId, extension: &str) -> ExportResult<String> {
    let names = tree
        .path(id)?
        .into_iter()
        .map(|node_id| tree.node(node_id).map(|node| node.name.trim().to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    let filename = format!("{}.{extension}", clean_filename(&names.join("--")));
    let len = filename.chars().count();
    if len > MAX_FILE_NAME_LEN {
        return Ok(filename.chars().skip(len - MAX_FILE_NAME_LEN).collect());
    }
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::{clean_filename, inline_layers, node_filename, rgb_to_24, InlineLayer, SpanStyle};
    use crate::model::node::SyntaxKind;
    use crate::model::tag::TagProperty;
    use crate::model::walk::Span;
    use crate::tree::DocumentTree;

    fn span(attributes: &[(TagProperty, &str)]) -> Span {
        Span {
            start: 0,
            text: "x".to_string(),
            attributes: attributes
                .iter()
                .map(|(property, value)| (*property, value.to_string()))
                .collect(),
        }
    }

    #[test]
    fn layers_follow_fixed_nesting_order() {
        let layers = inline_layers(&span(&[
            (TagProperty::Scale, "sup"),
            (TagProperty::Family, "monospace"),
            (TagProperty::Weight, "heavy"),
            (TagProperty::Foreground, "#ff0000"),
            (TagProperty::Style, "italic"),
        ]));
        assert_eq!(
            layers,
            vec![
                InlineLayer::Italic,
                InlineLayer::Bold,
                InlineLayer::Styled(SpanStyle {
                    foreground: Some("#ff0000".to_string()),
                    ..SpanStyle::default()
                }),
                InlineLayer::Monospace,
                InlineLayer::Superscript,
            ]
        );
    }

    #[test]
    fn bold_and_italic_wrap_headings_and_links() {
        let layers = inline_layers(&span(&[
            (TagProperty::Link, "webs https://example.com"),
            (TagProperty::Scale, "h2"),
            (TagProperty::Weight, "heavy"),
            (TagProperty::Style, "italic"),
        ]));
        assert_eq!(layers.len(), 4);
        assert_eq!(
            layers[..3],
            [
                InlineLayer::Italic,
                InlineLayer::Bold,
                InlineLayer::Heading(2)
            ]
        );
        assert!(matches!(layers[3], InlineLayer::Link(_)));
    }

    #[test]
    fn long_colors_are_shortened() {
        assert_eq!(rgb_to_24("#ffff00000000"), "#ff0000");
        assert_eq!(rgb_to_24("#00ff00"), "#00ff00");
    }

    #[test]
    fn filenames_drop_reserved_characters() {
        assert_eq!(clean_filename(" a/b: c?* "), "a-b_c");
    }

    #[test]
    fn node_filename_joins_ancestors_and_truncates() {
        let mut tree = DocumentTree::new();
        let parent = tree
            .add_top_level("Parent", SyntaxKind::RichText)
            .expect("parent should be created");
        let child = tree
            .add_child(parent, "Child", SyntaxKind::RichText)
            .expect("child should be created");
        assert_eq!(
            node_filename(&tree, child, "html").expect("filename"),
            "Parent--Child.html"
        );

        let long = tree
            .add_child(child, &"n".repeat(200), SyntaxKind::RichText)
            .expect("long node should be created");
        let filename = node_filename(&tree, long, "html").expect("filename");
        assert_eq!(filename.chars().count(), 142);
        assert!(filename.ends_with("n.html"));
    }
}
