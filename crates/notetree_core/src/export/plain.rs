//! Plain-text export.

use crate::cancel::CancelToken;
use crate::config::PlainTextOptions;
use crate::export::{
    for_each_node, inline_layers, node_content, node_filename, ExportReport, ExportResult,
    ExportScope, Exporter, InlineLayer, LinkResolver, NodeContent,
};
use crate::model::embedded::{EmbeddedKind, Table};
use crate::model::node::NodeId;
use crate::model::walk::Segment;
use crate::tree::DocumentTree;
use log::info;

/// Text of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainDocument {
    pub node: NodeId,
    /// `Parent--Child.txt` for per-node output.
    pub filename: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainTextExport {
    pub documents: Vec<PlainDocument>,
    pub report: ExportReport,
}

impl PlainTextExport {
    /// All documents as one file, each followed by a blank line.
    pub fn combined(&self) -> String {
        self.documents
            .iter()
            .map(|document| format!("{}\n\n", document.text))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlainTextExporter {
    options: PlainTextOptions,
}

impl PlainTextExporter {
    pub fn new(options: PlainTextOptions) -> Self {
        Self { options }
    }

    fn render_node(
        &self,
        tree: &DocumentTree,
        resolver: &LinkResolver<'_>,
        id: NodeId,
        range: Option<std::ops::Range<usize>>,
        report: &mut ExportReport,
    ) -> ExportResult<String> {
        let mut text = String::new();
        match node_content(tree, id, range)? {
            NodeContent::Code { text: code, .. } => text.push_str(&code),
            NodeContent::Rich(walk) => {
                for segment in walk.segments() {
                    match segment {
                        Segment::Text(span) => {
                            for layer in inline_layers(span) {
                                if let InlineLayer::Link(target) = layer {
                                    resolver.check(id, span.start, &target, report);
                                }
                            }
                            text.push_str(&span.text);
                        }
                        Segment::Object(object) => match &object.kind {
                            EmbeddedKind::Table(table) => text.push_str(&self.table(table)),
                            EmbeddedKind::CodeBox(codebox) => {
                                text.push_str(&format!(
                                    "\n```{}\n{}\n```\n",
                                    codebox.language,
                                    codebox.source.trim_end_matches('\n')
                                ));
                            }
                            EmbeddedKind::LinkMarker { target } => {
                                resolver.check(id, object.offset, target, report);
                                text.push_str(&target.display_text());
                            }
                            EmbeddedKind::Image { .. } | EmbeddedKind::Anchor { .. } => {}
                        },
                    }
                }
            }
        }
        Ok(text)
    }

    /// `||`-separated grid framed by horizontal rules.
    fn table(&self, table: &Table) -> String {
        let rule = &self.options.horizontal_rule;
        let mut text = format!("\n{rule}\n");
        for row in &table.rows {
            text.push_str("||");
            for cell in row {
                text.push_str(&format!(" {cell} ||"));
            }
            text.push_str(&format!("\n{rule}\n"));
        }
        text
    }
}

impl Exporter for PlainTextExporter {
    type Output = PlainTextExport;

    fn export(
        &self,
        tree: &DocumentTree,
        scope: &ExportScope,
        cancel: &CancelToken,
    ) -> ExportResult<PlainTextExport> {
        let resolver = LinkResolver::new(tree);
        let mut report = ExportReport::default();
        let mut documents = Vec::new();
        for_each_node(tree, scope, cancel, |id, range| {
            let node = tree.node(id)?;
            let body = match self.render_node(tree, &resolver, id, range, &mut report) {
                Ok(body) => body,
                Err(err) => {
                    let placeholder = format!("[export failed: {err}]");
                    report.record_failure(id, err);
                    placeholder
                }
            };
            let text = if self.options.include_node_name {
                format!("{}\n{body}", node.name.to_uppercase())
            } else {
                body
            };
            documents.push(PlainDocument {
                node: id,
                filename: node_filename(tree, id, "txt")?,
                text,
            });
            Ok(())
        })?;
        info!(
            "event=export_plain module=export status=ok documents={} dangling={} failures={}",
            documents.len(),
            report.dangling.len(),
            report.failures.len()
        );
        Ok(PlainTextExport { documents, report })
    }
}
