use notetree_core::{
    CancelToken, DanglingReason, DocumentTree, EmbeddedKind, ExportScope, Exporter, HtmlExporter,
    HtmlOptions, Justification, LinkTarget, NodeId, PlainTextExporter, PlainTextOptions,
    PrintExporter, PrintOptions, SyntaxKind, OBJECT_PLACEHOLDER,
};

fn greeting(tags_in_order: &[(&str, usize, usize)]) -> (DocumentTree, NodeId) {
    let mut tree = DocumentTree::new();
    let id = tree.add_top_level("Greeting", SyntaxKind::RichText).unwrap();
    let buffer = tree.buffer_mut(id).unwrap();
    buffer.insert(0, "Hello world").unwrap();
    for (name, start, end) in tags_in_order {
        buffer.apply_tag(name, *start, *end).unwrap();
    }
    (tree, id)
}

fn html_page(tree: &DocumentTree, scope: ExportScope) -> String {
    let export = HtmlExporter::new(HtmlOptions::default())
        .export(tree, &scope, &CancelToken::new())
        .unwrap();
    export.pages[0].html.clone()
}

#[test]
fn bold_wraps_a_heading_nested_inside_it() {
    let (tree, id) = greeting(&[("weight_heavy", 0, 11), ("scale_h1", 0, 5)]);
    let html = html_page(&tree, ExportScope::Node { id, range: None });
    assert!(html.contains("<strong><h1 id=\"h1-1\">Hello</h1></strong><strong> world</strong>"));
}

#[test]
fn split_heading_carries_its_anchor_once() {
    let (tree, id) = greeting(&[("scale_h1", 0, 5), ("style_italic", 0, 2)]);
    let html = html_page(&tree, ExportScope::Node { id, range: None });
    assert!(html.contains("<em><h1 id=\"h1-1\">He</h1></em><h1>llo</h1> world"));
    assert_eq!(html.matches("id=\"h1-1\"").count(), 1);
}

#[test]
fn print_markup_nests_italic_then_bold_around_heading_size() {
    let (tree, _) = greeting(&[("scale_h2", 0, 5), ("weight_heavy", 0, 5), ("style_italic", 0, 5)]);
    let export = PrintExporter::new(PrintOptions {
        include_node_name: false,
        new_page_per_node: false,
    })
    .export(&tree, &ExportScope::All, &CancelToken::new())
    .unwrap();
    assert_eq!(
        export.markup,
        "<i><b><span size=\"x-large\">Hello</span></b></i> world"
    );
}

#[test]
fn tag_application_order_does_not_change_output() {
    let (bold_first, id) = greeting(&[("weight_heavy", 0, 11), ("scale_h1", 0, 5)]);
    let (heading_first, _) = greeting(&[("scale_h1", 0, 5), ("weight_heavy", 0, 11)]);
    let scope = ExportScope::Node { id, range: None };
    assert_eq!(html_page(&bold_first, scope.clone()), html_page(&heading_first, scope));
}

#[test]
fn selection_export_covers_only_the_range() {
    let (tree, id) = greeting(&[("weight_heavy", 0, 11), ("scale_h1", 0, 5)]);
    let html = html_page(
        &tree,
        ExportScope::Node {
            id,
            range: Some(6..11),
        },
    );
    assert!(html.contains("<strong>world</strong>"));
    assert!(!html.contains("Hello"));
}

#[test]
fn links_to_missing_anchors_are_reported_and_rendered_as_text() {
    let mut tree = DocumentTree::new();
    let target = tree.add_top_level("Target", SyntaxKind::RichText).unwrap();
    let buffer = tree.buffer_mut(target).unwrap();
    buffer.insert(0, "Title").unwrap();
    buffer.apply_tag("scale_h1", 0, 5).unwrap();

    let source = tree.add_top_level("Source", SyntaxKind::RichText).unwrap();
    let buffer = tree.buffer_mut(source).unwrap();
    buffer.insert(0, "heading missing").unwrap();
    buffer
        .apply_tag(&format!("link_node {target} h1-1"), 0, 7)
        .unwrap();
    buffer
        .apply_tag(&format!("link_node {target} nowhere"), 8, 15)
        .unwrap();

    let export = HtmlExporter::new(HtmlOptions::default())
        .export(&tree, &ExportScope::All, &CancelToken::new())
        .unwrap();
    let page = &export.pages[1].html;
    assert!(page.contains("<a href=\"Target.html#h1-1\">heading</a>"));
    assert!(page.contains(" missing"));
    assert!(!page.contains("#nowhere"));
    assert_eq!(export.report.dangling.len(), 1);
    let dangling = &export.report.dangling[0];
    assert_eq!(dangling.source, source);
    assert_eq!(dangling.offset, 8);
    assert_eq!(
        dangling.reason,
        DanglingReason::MissingAnchor("nowhere".to_string())
    );
    assert!(export.report.failures.is_empty());
}

#[test]
fn subtree_export_indexes_only_the_subtree() {
    let mut tree = DocumentTree::new();
    let outside = tree.add_top_level("Outside", SyntaxKind::RichText).unwrap();
    let root = tree.add_top_level("Root", SyntaxKind::RichText).unwrap();
    let child = tree
        .add_child(root, "Code", SyntaxKind::Code("python".to_string()))
        .unwrap();
    tree.buffer_mut(child)
        .unwrap()
        .insert(0, "if a < b:\n    pass\n")
        .unwrap();

    let export = HtmlExporter::new(HtmlOptions::default())
        .export(&tree, &ExportScope::Subtree(root), &CancelToken::new())
        .unwrap();
    let nodes: Vec<NodeId> = export.pages.iter().map(|page| page.node).collect();
    assert_eq!(nodes, vec![root, child]);
    assert!(!nodes.contains(&outside));
    assert_eq!(export.pages[1].filename, "Root--Code.html");
    assert!(export.pages[1]
        .html
        .contains("<pre><code class=\"language-python\">if a &lt; b:\n    pass\n</code></pre>"));
    let index = export.index.unwrap();
    assert!(index.contains("1 Root"));
    assert!(index.contains("1.1 Code"));
    assert!(!index.contains("Outside"));
}

#[test]
fn html_sidebar_follows_options() {
    let (tree, _) = greeting(&[]);
    let export = HtmlExporter::new(HtmlOptions {
        include_tree_index: false,
    })
    .export(&tree, &ExportScope::All, &CancelToken::new())
    .unwrap();
    assert!(!export.pages[0].html.contains("tree-index\">"));
    assert!(export.index.is_some());
}

#[test]
fn missing_scope_node_is_an_error() {
    let tree = DocumentTree::new();
    let result = PlainTextExporter::new(PlainTextOptions::default()).export(
        &tree,
        &ExportScope::Subtree(NodeId(5)),
        &CancelToken::new(),
    );
    assert!(result.is_err());
}

#[test]
fn plain_text_renders_link_markers_and_counts_dangling_links() {
    let mut tree = DocumentTree::new();
    let id = tree.add_top_level("Links", SyntaxKind::RichText).unwrap();
    let buffer = tree.buffer_mut(id).unwrap();
    buffer.insert(0, "see ").unwrap();
    buffer
        .place_embedded(
            4,
            EmbeddedKind::LinkMarker {
                target: LinkTarget::Web("https://example.com".to_string()),
            },
            Justification::Left,
        )
        .unwrap();
    buffer
        .place_embedded(
            5,
            EmbeddedKind::LinkMarker {
                target: LinkTarget::Node {
                    id: NodeId(42),
                    anchor: None,
                },
            },
            Justification::Left,
        )
        .unwrap();
    buffer
        .place_embedded(6, EmbeddedKind::Anchor { name: "a".to_string() }, Justification::Left)
        .unwrap();

    let export = PlainTextExporter::new(PlainTextOptions::default())
        .export(&tree, &ExportScope::All, &CancelToken::new())
        .unwrap();
    assert_eq!(
        export.documents[0].text,
        "LINKS\nsee https://example.comnode 42"
    );
    assert_eq!(export.report.dangling.len(), 1);
    assert_eq!(export.report.dangling[0].offset, 5);
    assert_eq!(export.report.dangling[0].reason, DanglingReason::MissingNode);
}

#[test]
fn print_markup_keeps_one_placeholder_per_object() {
    let mut tree = DocumentTree::new();
    let id = tree.add_top_level("Print <me>", SyntaxKind::RichText).unwrap();
    let buffer = tree.buffer_mut(id).unwrap();
    buffer.insert(0, "ab").unwrap();
    buffer.apply_tag("style_italic", 0, 1).unwrap();
    buffer
        .place_embedded(
            1,
            EmbeddedKind::Image {
                png: vec![1],
                link: None,
            },
            Justification::Center,
        )
        .unwrap();
    buffer
        .place_embedded(3, EmbeddedKind::Anchor { name: "end".to_string() }, Justification::Left)
        .unwrap();
    let code = tree.add_top_level("Code", SyntaxKind::PlainText).unwrap();
    tree.buffer_mut(code).unwrap().insert(0, "x<y").unwrap();

    let export = PrintExporter::new(PrintOptions::default())
        .export(&tree, &ExportScope::All, &CancelToken::new())
        .unwrap();
    assert_eq!(
        export.markup,
        format!(
            "<i><b><span size=\"xx-large\">Print &lt;me&gt;</span></b></i>\n\n<i>a</i>{OBJECT_PLACEHOLDER}b\n\n\n<i><b><span size=\"xx-large\">Code</span></b></i>\n\n<tt>x&lt;y</tt>"
        )
    );
    assert_eq!(
        export.markup.matches(OBJECT_PLACEHOLDER).count(),
        export.objects.len()
    );
    assert_eq!(export.objects[0].object.offset, 1);
    assert_eq!(export.objects[0].object.justification, Justification::Center);
}

#[test]
fn cancelled_exports_stop_before_the_first_node() {
    let (tree, _) = greeting(&[]);
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(PrintExporter::new(PrintOptions::default())
        .export(&tree, &ExportScope::All, &cancel)
        .is_err());
    assert!(PlainTextExporter::new(PlainTextOptions::default())
        .export(&tree, &ExportScope::All, &cancel)
        .is_err());
}
