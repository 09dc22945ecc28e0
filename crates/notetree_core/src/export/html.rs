//! HTML site export: one page per node, a shared stylesheet and an index.

use crate::cancel::CancelToken;
use crate::config::HtmlOptions;
use crate::export::{
    for_each_node, inline_layers, node_content, node_filename, ExportReport, ExportResult,
    ExportScope, Exporter, InlineLayer, LinkResolver, NodeContent, SpanStyle,
};
use crate::model::buffer::Heading;
use crate::model::embedded::{EmbeddedKind, EmbeddedObject, Justification, Table};
use crate::model::node::NodeId;
use crate::model::tag::LinkTarget;
use crate::model::walk::Segment;
use crate::tree::DocumentTree;
use log::info;
use std::collections::HashSet;
use std::fmt::Write as _;

pub const STYLESHEET_NAME: &str = "styles.css";
pub const INDEX_NAME: &str = "index.html";

const HEADING_CLOSERS: [&str; 3] = ["</h1>", "</h2>", "</h3>"];

const STYLESHEET: &str = "\
body { font-family: sans-serif; margin: 0; }
.tree-index { vertical-align: top; width: 20%; padding: 0.5em; }
.page { vertical-align: top; padding: 0.5em; }
.tree-index ul { list-style: none; padding-left: 1em; }
table.object { border-collapse: collapse; }
table.object td, table.object th { border: 1px solid #888888; padding: 0.2em 0.4em; }
pre.codebox { border: 1px solid #888888; padding: 0.4em; }
.export-error { color: #b00000; font-style: italic; }
";

/// One rendered node page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlPage {
    pub node: NodeId,
    pub filename: String,
    pub html: String,
}

/// Image sidecar the caller writes next to the pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    /// Path relative to the export folder, e.g. `images/3-1.png`.
    pub path: String,
    pub png: Vec<u8>,
}

/// Everything an HTML export produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlExport {
    pub pages: Vec<HtmlPage>,
    /// `index.html` body; `None` for single-node exports.
    pub index: Option<String>,
    pub stylesheet: String,
    pub images: Vec<ImageFile>,
    pub report: ExportReport,
}

#[derive(Debug, Clone, Default)]
pub struct HtmlExporter {
    options: HtmlOptions,
}

impl HtmlExporter {
    pub fn new(options: HtmlOptions) -> Self {
        Self { options }
    }
}

impl Exporter for HtmlExporter {
    type Output = HtmlExport;

    fn export(
        &self,
        tree: &DocumentTree,
        scope: &ExportScope,
        cancel: &CancelToken,
    ) -> ExportResult<HtmlExport> {
        let with_index = !matches!(scope, ExportScope::Node { .. });
        let tree_links = if with_index {
            Some(tree_links(tree, scope)?)
        } else {
            None
        };
        let resolver = LinkResolver::new(tree);
        let mut output = HtmlExport {
            pages: Vec::new(),
            index: None,
            stylesheet: STYLESHEET.to_string(),
            images: Vec::new(),
            report: ExportReport::default(),
        };

        for_each_node(tree, scope, cancel, |id, range| {
            let name = tree.node(id)?.name.clone();
            let filename = node_filename(tree, id, "html")?;
            let mut renderer = PageRenderer {
                tree,
                resolver: &resolver,
                node: id,
                images: &mut output.images,
                report: &mut output.report,
                image_count: 0,
                headings: Vec::new(),
                anchored: HashSet::new(),
                html: String::new(),
            };
            let body = match renderer.render(range) {
                Ok(()) => renderer.html,
                Err(err) => {
                    let placeholder = format!(
                        "<p class=\"export-error\">Export failed: {}</p>",
                        escape(&err.to_string())
                    );
                    output.report.record_failure(id, err);
                    placeholder
                }
            };
            let sidebar = tree_links
                .as_deref()
                .filter(|_| self.options.include_tree_index);
            output.pages.push(HtmlPage {
                node: id,
                filename,
                html: page(&name, sidebar, &body),
            });
            Ok(())
        })?;

        output.index = tree_links.map(|links| page("Index", None, &links));
        info!(
            "event=export_html module=export status=ok pages={} images={} dangling={} failures={}",
            output.pages.len(),
            output.images.len(),
            output.report.dangling.len(),
            output.report.failures.len()
        );
        Ok(output)
    }
}

fn page(title: &str, sidebar: Option<&str>, body: &str) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(html, "<title>{}</title>", escape(title));
    let _ = writeln!(html, "<link rel=\"stylesheet\" href=\"{STYLESHEET_NAME}\">");
    html.push_str("</head>\n<body>\n");
    match sidebar {
        Some(sidebar) => {
            let _ = write!(
                html,
                "<table width=\"100%\"><tr><td class=\"tree-index\">{sidebar}</td><td class=\"page\">{body}</td></tr></table>\n"
            );
        }
        None => {
            let _ = writeln!(html, "<div class=\"page\">{body}</div>");
        }
    }
    html.push_str("</body>\n</html>\n");
    html
}

/// Numbered, nested link list of the scope's nodes.
fn tree_links(tree: &DocumentTree, scope: &ExportScope) -> ExportResult<String> {
    let tops = match scope {
        ExportScope::Subtree(root) => vec![*root],
        _ => tree.roots().to_vec(),
    };
    let mut html = String::from("<ul>");
    for (index, id) in tops.iter().enumerate() {
        tree_links_iter(tree, *id, &(index + 1).to_string(), &mut html)?;
    }
    html.push_str("</ul>");
    Ok(html)
}

fn tree_links_iter(
    tree: &DocumentTree,
    id: NodeId,
    number: &str,
    html: &mut String,
) -> ExportResult<()> {
    let node = tree.node(id)?;
    let _ = write!(
        html,
        "<li><a href=\"{}\">{number} {}</a>",
        escape(&node_filename(tree, id, "html")?),
        escape(&node.name)
    );
    if !node.children.is_empty() {
        html.push_str("<ul>");
        for (index, child) in node.children.iter().enumerate() {
            tree_links_iter(tree, *child, &format!("{number}.{}", index + 1), html)?;
        }
        html.push_str("</ul>");
    }
    html.push_str("</li>");
    Ok(())
}

struct PageRenderer<'r, 't> {
    tree: &'t DocumentTree,
    resolver: &'r LinkResolver<'t>,
    node: NodeId,
    images: &'r mut Vec<ImageFile>,
    report: &'r mut ExportReport,
    image_count: usize,
    headings: Vec<Heading>,
    /// Heading anchors already emitted as element ids.
    anchored: HashSet<String>,
    html: String,
}

impl PageRenderer<'_, '_> {
    fn render(&mut self, range: Option<std::ops::Range<usize>>) -> ExportResult<()> {
        match node_content(self.tree, self.node, range)? {
            NodeContent::Code { language, text } => {
                let class = language
                    .map(|language| format!(" class=\"language-{}\"", escape(&language)))
                    .unwrap_or_default();
                let _ = write!(self.html, "<pre><code{class}>{}</code></pre>", escape(&text));
            }
            NodeContent::Rich(walk) => {
                self.headings = self.tree.buffer(self.node)?.headings();
                for segment in walk.segments() {
                    match segment {
                        Segment::Text(span) => {
                            self.render_span(span.start, &span.text, &inline_layers(span))
                        }
                        Segment::Object(object) => self.render_object(object),
                    }
                }
            }
        }
        Ok(())
    }

    /// Opening heading tag; the anchor id goes on the first piece only.
    fn open_heading(&mut self, offset: usize, level: u8) {
        let anchor = self
            .headings
            .iter()
            .find(|heading| heading.start <= offset && offset < heading.end)
            .map(|heading| heading.anchor.clone());
        match anchor {
            Some(anchor) if self.anchored.insert(anchor.clone()) => {
                let _ = write!(self.html, "<h{level} id=\"{anchor}\">");
            }
            _ => {
                let _ = write!(self.html, "<h{level}>");
            }
        }
    }

    fn render_span(&mut self, offset: usize, text: &str, layers: &[InlineLayer]) {
        let mut closers = Vec::with_capacity(layers.len());
        for layer in layers {
            match layer {
                InlineLayer::Heading(level) => {
                    self.open_heading(offset, *level);
                    closers.push(HEADING_CLOSERS[usize::from(*level).clamp(1, 3) - 1]);
                }
                InlineLayer::Link(target) => {
                    if let Some(href) = self.href(offset, target) {
                        let _ = write!(self.html, "<a href=\"{}\">", escape(&href));
                        closers.push("</a>");
                    }
                }
                InlineLayer::Bold => {
                    self.html.push_str("<strong>");
                    closers.push("</strong>");
                }
                InlineLayer::Italic => {
                    self.html.push_str("<em>");
                    closers.push("</em>");
                }
                InlineLayer::Styled(style) => {
                    let _ = write!(self.html, "<span style=\"{}\">", css(style));
                    closers.push("</span>");
                }
                InlineLayer::Monospace => {
                    self.html.push_str("<code>");
                    closers.push("</code>");
                }
                InlineLayer::Superscript => {
                    self.html.push_str("<sup>");
                    closers.push("</sup>");
                }
                InlineLayer::Subscript => {
                    self.html.push_str("<sub>");
                    closers.push("</sub>");
                }
            }
        }
        self.html.push_str(&escape(text).replace('\n', "<br>\n"));
        for closer in closers.into_iter().rev() {
            self.html.push_str(closer);
        }
    }

    fn render_object(&mut self, object: &EmbeddedObject) {
        let align = alignment_style(object.justification);
        match &object.kind {
            EmbeddedKind::Image { png, link } => {
                self.image_count += 1;
                let path = format!("images/{}-{}.png", self.node, self.image_count);
                let image = format!("<img src=\"{path}\" alt=\"{path}\" />");
                let image = match link
                    .as_ref()
                    .and_then(|target| self.href(object.offset, target))
                {
                    Some(href) => format!("<a href=\"{}\">{image}</a>", escape(&href)),
                    None => image,
                };
                let _ = write!(self.html, "<table style=\"{align}\"><tr><td>{image}</td></tr></table>");
                self.images.push(ImageFile {
                    path,
                    png: png.clone(),
                });
            }
            EmbeddedKind::Table(table) => self.render_table(table, align),
            EmbeddedKind::CodeBox(codebox) => {
                let _ = write!(
                    self.html,
                    "<pre class=\"codebox\" style=\"{align}\"><code class=\"language-{}\">{}</code></pre>",
                    escape(&codebox.language),
                    escape(&codebox.source)
                );
            }
            EmbeddedKind::Anchor { name } => {
                let _ = write!(self.html, "<a name=\"{}\"></a>", escape(name));
            }
            EmbeddedKind::LinkMarker { target } => {
                let text = escape(&target.display_text());
                match self.href(object.offset, target) {
                    Some(href) => {
                        let _ = write!(self.html, "<a href=\"{}\">{text}</a>", escape(&href));
                    }
                    None => self.html.push_str(&text),
                }
            }
        }
    }

    fn render_table(&mut self, table: &Table, align: &str) {
        let _ = write!(
            self.html,
            "<table class=\"object\" style=\"{align};text-align:center\">"
        );
        for width in &table.column_widths {
            let _ = write!(self.html, "<col width=\"{width}\" />");
        }
        let columns = table.column_count();
        for (index, row) in table.rows.iter().enumerate() {
            let cell_tag = if index == 0 { "th" } else { "td" };
            self.html.push_str("<tr>");
            for cell in row {
                let _ = write!(self.html, "<{cell_tag}>{}</{cell_tag}>", escape(cell));
            }
            // ragged rows are padded to the widest one
            for _ in row.len()..columns {
                let _ = write!(self.html, "<{cell_tag}></{cell_tag}>");
            }
            self.html.push_str("</tr>");
        }
        self.html.push_str("</table>");
    }

    /// Link destination, or `None` for a dangling node link.
    fn href(&mut self, offset: usize, target: &LinkTarget) -> Option<String> {
        if !self.resolver.check(self.node, offset, target, self.report) {
            return None;
        }
        match target {
            LinkTarget::Web(url) => Some(url.clone()),
            LinkTarget::File(path) | LinkTarget::Folder(path) => Some(format!("file://{path}")),
            LinkTarget::Node { id, anchor } => {
                let page = node_filename(self.tree, *id, "html").ok()?;
                Some(match anchor {
                    Some(anchor) => format!("{page}#{anchor}"),
                    None => page,
                })
            }
        }
    }
}

fn alignment_style(justification: Justification) -> &'static str {
    match justification {
        Justification::Center => "margin-left:auto;margin-right:auto",
        Justification::Right => "margin-left:auto",
        Justification::Left | Justification::Fill => "display:inline-table",
    }
}

fn css(style: &SpanStyle) -> String {
    let mut css = String::new();
    if let Some(color) = &style.foreground {
        let _ = write!(css, "color:{color};");
    }
    if let Some(color) = &style.background {
        let _ = write!(css, "background-color:{color};");
    }
    match (style.underline, style.strikethrough) {
        (true, true) => css.push_str("text-decoration:underline line-through;"),
        (true, false) => css.push_str("text-decoration:underline;"),
        (false, true) => css.push_str("text-decoration:line-through;"),
        (false, false) => {}
    }
    if style.small {
        css.push_str("font-size:x-small;");
    }
    escape(&css)
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::HtmlExporter;
    use crate::cancel::CancelToken;
    use crate::config::HtmlOptions;
    use crate::export::{DanglingReason, ExportScope, Exporter};
    use crate::model::embedded::{EmbeddedKind, Justification, Table};
    use crate::model::node::{NodeId, SyntaxKind};
    use crate::tree::DocumentTree;

    fn export_all(tree: &DocumentTree) -> super::HtmlExport {
        HtmlExporter::new(HtmlOptions::default())
            .export(tree, &ExportScope::All, &CancelToken::new())
            .expect("export should succeed")
    }

    #[test]
    fn tables_render_header_row() {
        let mut tree = DocumentTree::new();
        let id = tree
            .add_top_level("Tables", SyntaxKind::RichText)
            .expect("node should be created");
        tree.buffer_mut(id)
            .expect("buffer")
            .place_embedded(
                0,
                EmbeddedKind::Table(Table {
                    rows: vec![
                        vec!["h1".to_string(), "h2".to_string()],
                        vec!["a<b".to_string(), "c".to_string()],
                        vec!["short".to_string()],
                    ],
                    column_widths: vec![40, 60],
                }),
                Justification::Center,
            )
            .expect("table");
        let export = export_all(&tree);
        let html = &export.pages[0].html;
        assert!(html.contains("<tr><th>h1</th><th>h2</th></tr><tr><td>a&lt;b</td><td>c</td></tr><tr><td>short</td><td></td></tr>"));
        assert!(html.contains("margin-left:auto;margin-right:auto"));
    }

    #[test]
    fn images_become_numbered_sidecars() {
        let mut tree = DocumentTree::new();
        let id = tree
            .add_top_level("Pics", SyntaxKind::RichText)
            .expect("node should be created");
        let buffer = tree.buffer_mut(id).expect("buffer");
        for offset in [0, 1] {
            buffer
                .place_embedded(
                    offset,
                    EmbeddedKind::Image {
                        png: vec![1, 2, 3],
                        link: None,
                    },
                    Justification::Left,
                )
                .expect("image");
        }
        let export = export_all(&tree);
        let paths: Vec<&str> = export.images.iter().map(|image| image.path.as_str()).collect();
        assert_eq!(paths, vec!["images/1-1.png", "images/1-2.png"]);
        assert!(export.pages[0].html.contains("<img src=\"images/1-2.png\""));
    }

    #[test]
    fn node_links_resolve_to_pages_and_dangling_links_are_reported() {
        let mut tree = DocumentTree::new();
        let target = tree
            .add_top_level("Target", SyntaxKind::RichText)
            .expect("target should be created");
        tree.buffer_mut(target)
            .expect("buffer")
            .place_embedded(
                0,
                EmbeddedKind::Anchor {
                    name: "here".to_string(),
                },
                Justification::Left,
            )
            .expect("anchor");
        let source = tree
            .add_top_level("Source", SyntaxKind::RichText)
            .expect("source should be created");
        let buffer = tree.buffer_mut(source).expect("buffer");
        buffer.insert(0, "good bad").expect("insert");
        buffer
            .apply_tag(&format!("link_node {target} here"), 0, 4)
            .expect("good link");
        buffer.apply_tag("link_node 99", 5, 8).expect("bad link");

        let export = export_all(&tree);
        let html = &export.pages[1].html;
        assert!(html.contains("<a href=\"Target.html#here\">good</a>"));
        assert!(html.contains(" bad"));
        assert_eq!(export.report.dangling.len(), 1);
        assert_eq!(export.report.dangling[0].source, source);
        assert_eq!(export.report.dangling[0].reason, DanglingReason::MissingNode);
    }

    #[test]
    fn index_lists_nodes_with_outline_numbers() {
        let mut tree = DocumentTree::new();
        let first = tree
            .add_top_level("First", SyntaxKind::RichText)
            .expect("first should be created");
        tree.add_child(first, "Inner", SyntaxKind::RichText)
            .expect("inner should be created");
        tree.add_top_level("Second", SyntaxKind::RichText)
            .expect("second should be created");
        let export = export_all(&tree);
        let index = export.index.expect("full export has an index");
        assert!(index.contains("<a href=\"First--Inner.html\">1.1 Inner</a>"));
        assert!(index.contains("<a href=\"Second.html\">2 Second</a>"));
        assert_eq!(export.pages.len(), 3);
    }

    #[test]
    fn out_of_range_selection_yields_placeholder() {
        let mut tree = DocumentTree::new();
        let id = tree
            .add_top_level("Short", SyntaxKind::RichText)
            .expect("node should be created");
        let export = HtmlExporter::new(HtmlOptions::default())
            .export(
                &tree,
                &ExportScope::Node {
                    id,
                    range: Some(0..10),
                },
                &CancelToken::new(),
            )
            .expect("export should continue past node failures");
        assert!(export.pages[0].html.contains("export-error"));
        assert_eq!(export.report.failures.len(), 1);
        assert!(export.index.is_none());
        assert_eq!(export.report.failures[0].node, NodeId(1));
    }

    #[test]
    fn cancelled_export_stops() {
        let mut tree = DocumentTree::new();
        tree.add_top_level("A", SyntaxKind::RichText)
            .expect("node should be created");
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = HtmlExporter::new(HtmlOptions::default()).export(&tree, &ExportScope::All, &cancel);
        assert_eq!(result, Err(crate::export::ExportError::Cancelled));
    }
}
