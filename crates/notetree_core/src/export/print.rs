//! Print markup export (Pango-style).

use crate::cancel::CancelToken;
use crate::config::PrintOptions;
use crate::export::{
    for_each_node, inline_layers, node_content, ExportReport, ExportResult, ExportScope, Exporter,
    InlineLayer, LinkResolver, NodeContent,
};
use crate::model::embedded::{EmbeddedKind, EmbeddedObject, OBJECT_PLACEHOLDER};
use crate::model::node::NodeId;
use crate::model::walk::Segment;
use crate::tree::DocumentTree;
use log::info;
use std::fmt::Write as _;

const PAGE_BREAK: char = '\u{000C}';

/// Object handed to the print collaborator in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintObject {
    pub node: NodeId,
    pub object: EmbeddedObject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintExport {
    /// Markup with one U+FFFC per entry of `objects`.
    pub markup: String,
    pub objects: Vec<PrintObject>,
    pub report: ExportReport,
}

#[derive(Debug, Clone, Default)]
pub struct PrintExporter {
    options: PrintOptions,
}

impl PrintExporter {
    pub fn new(options: PrintOptions) -> Self {
        Self { options }
    }

    fn render_node(
        &self,
        tree: &DocumentTree,
        resolver: &LinkResolver<'_>,
        id: NodeId,
        range: Option<std::ops::Range<usize>>,
        output: &mut PrintExport,
    ) -> ExportResult<String> {
        let mut markup = String::new();
        match node_content(tree, id, range)? {
            NodeContent::Code { text, .. } => {
                let _ = write!(markup, "<tt>{}</tt>", escape(&text));
            }
            NodeContent::Rich(walk) => {
                for segment in walk.segments() {
                    match segment {
                        Segment::Text(span) => {
                            let layers = inline_layers(span);
                            for layer in &layers {
                                if let InlineLayer::Link(target) = layer {
                                    resolver.check(id, span.start, target, &mut output.report);
                                }
                            }
                            markup.push_str(&markup_span(&span.text, &layers));
                        }
                        Segment::Object(object) => match &object.kind {
                            EmbeddedKind::Image { .. }
                            | EmbeddedKind::Table(_)
                            | EmbeddedKind::CodeBox(_) => {
                                markup.push(OBJECT_PLACEHOLDER);
                                output.objects.push(PrintObject {
                                    node: id,
                                    object: object.clone(),
                                });
                            }
                            EmbeddedKind::LinkMarker { target } => {
                                resolver.check(id, object.offset, target, &mut output.report);
                                markup.push_str(&escape(&target.display_text()));
                            }
                            EmbeddedKind::Anchor { .. } => {}
                        },
                    }
                }
            }
        }
        Ok(markup)
    }
}

impl Exporter for PrintExporter {
    type Output = PrintExport;

    fn export(
        &self,
        tree: &DocumentTree,
        scope: &ExportScope,
        cancel: &CancelToken,
    ) -> ExportResult<PrintExport> {
        let resolver = LinkResolver::new(tree);
        let mut output = PrintExport {
            markup: String::new(),
            objects: Vec::new(),
            report: ExportReport::default(),
        };
        let mut first = true;
        for_each_node(tree, scope, cancel, |id, range| {
            let node = tree.node(id)?;
            let objects_before = output.objects.len();
            let body = match self.render_node(tree, &resolver, id, range, &mut output) {
                Ok(body) => body,
                Err(err) => {
                    output.objects.truncate(objects_before);
                    let placeholder = format!("<i>export failed: {}</i>", escape(&err.to_string()));
                    output.report.record_failure(id, err);
                    placeholder
                }
            };
            if !first {
                if self.options.new_page_per_node {
                    output.markup.push(PAGE_BREAK);
                } else {
                    output.markup.push_str("\n\n\n");
                }
            }
            first = false;
            if self.options.include_node_name {
                let _ = write!(
                    output.markup,
                    "<i><b><span size=\"xx-large\">{}</span></b></i>\n\n",
                    escape(&node.name)
                );
            }
            output.markup.push_str(&body);
            Ok(())
        })?;
        info!(
            "event=export_print module=export status=ok objects={} dangling={} failures={}",
            output.objects.len(),
            output.report.dangling.len(),
            output.report.failures.len()
        );
        Ok(output)
    }
}

fn markup_span(text: &str, layers: &[InlineLayer]) -> String {
    let mut open = String::new();
    let mut closers = Vec::with_capacity(layers.len());
    for layer in layers {
        match layer {
            InlineLayer::Heading(level) => {
                let size = match level {
                    1 => "xx-large",
                    2 => "x-large",
                    _ => "large",
                };
                let _ = write!(open, "<span size=\"{size}\">");
                closers.push("</span>");
            }
            InlineLayer::Link(_) => {
                open.push_str("<u>");
                closers.push("</u>");
            }
            InlineLayer::Bold => {
                open.push_str("<b>");
                closers.push("</b>");
            }
            InlineLayer::Italic => {
                open.push_str("<i>");
                closers.push("</i>");
            }
            InlineLayer::Styled(style) => {
                open.push_str("<span");
                if let Some(color) = &style.foreground {
                    let _ = write!(open, " foreground=\"{}\"", escape(color));
                }
                if let Some(color) = &style.background {
                    let _ = write!(open, " background=\"{}\"", escape(color));
                }
                if style.underline {
                    open.push_str(" underline=\"single\"");
                }
                if style.strikethrough {
                    open.push_str(" strikethrough=\"true\"");
                }
                if style.small {
                    open.push_str(" size=\"x-small\"");
                }
                open.push('>');
                closers.push("</span>");
            }
            InlineLayer::Monospace => {
                open.push_str("<tt>");
                closers.push("</tt>");
            }
            InlineLayer::Superscript => {
                open.push_str("<sup>");
                closers.push("</sup>");
            }
            InlineLayer::Subscript => {
                open.push_str("<sub>");
                closers.push("</sub>");
            }
        }
    }
    open.push_str(&escape(text));
    for closer in closers.into_iter().rev() {
        open.push_str(closer);
    }
    open
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
