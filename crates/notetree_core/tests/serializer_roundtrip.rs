use notetree_core::{
    deserialize, serialize_node, serialize_subtree, serialize_tree, CodeBox, DocumentTree,
    EmbeddedKind, Justification, LinkTarget, MalformedReason, NodeId, SerializeError, SyntaxKind,
    Table, TreeError,
};

fn rich_document() -> (DocumentTree, NodeId, NodeId) {
    let mut tree = DocumentTree::new();
    let root = tree.add_top_level("Project <notes>", SyntaxKind::RichText).unwrap();
    let child = tree.add_child(root, "Snippets", SyntaxKind::Code("rust".to_string())).unwrap();
    let plain = tree.add_top_level("Scratch", SyntaxKind::PlainText).unwrap();

    let buffer = tree.buffer_mut(root).unwrap();
    buffer
        .insert(0, "Heading\nSome \"quoted\" & <escaped> text, ünïcödé \u{1F600}\n  indented line\n")
        .unwrap();
    buffer.apply_tag("scale_h1", 0, 7).unwrap();
    buffer.apply_tag("weight_heavy", 8, 12).unwrap();
    buffer.apply_tag("style_italic", 10, 20).unwrap();
    buffer.apply_tag("foreground_#aabbcc", 13, 21).unwrap();
    buffer.apply_tag("background_#112233445566", 22, 24).unwrap();
    buffer.apply_tag("underline_single", 24, 26).unwrap();
    buffer.apply_tag("strikethrough_true", 26, 28).unwrap();
    buffer.apply_tag("family_monospace", 28, 30).unwrap();
    buffer.apply_tag("scale_sup", 30, 31).unwrap();
    buffer.apply_tag("link_webs https://example.com/?a=1&b=2", 32, 36).unwrap();
    buffer
        .apply_tag(&format!("link_{}", LinkTarget::File("/tmp/a b.txt".to_string()).to_value()), 36, 38)
        .unwrap();
    buffer.apply_tag_at_cursor("justification_center", 60).unwrap();

    let end = buffer.len();
    buffer
        .place_embedded(
            end,
            EmbeddedKind::Image {
                png: vec![0x89, b'P', b'N', b'G', 0, 255, 7],
                link: Some(LinkTarget::Node {
                    id: child,
                    anchor: Some("top".to_string()),
                }),
            },
            Justification::Center,
        )
        .unwrap();
    buffer
        .place_embedded(
            8,
            EmbeddedKind::Table(Table {
                rows: vec![
                    vec!["Name".to_string(), "Value & unit".to_string()],
                    vec!["x".to_string(), String::new()],
                ],
                column_widths: vec![80, 120],
            }),
            Justification::Right,
        )
        .unwrap();
    buffer
        .place_embedded(
            3,
            EmbeddedKind::CodeBox(CodeBox {
                source: "fn main() {\n    println!(\"<hi>\");\n}\n".to_string(),
                language: "rust".to_string(),
                width: 60,
                height: 40,
                width_in_pixels: false,
                highlight_brackets: false,
                show_line_numbers: true,
            }),
            Justification::Left,
        )
        .unwrap();
    buffer
        .place_embedded(0, EmbeddedKind::Anchor { name: "top".to_string() }, Justification::Left)
        .unwrap();
    let end = buffer.len();
    buffer
        .place_embedded(
            end,
            EmbeddedKind::LinkMarker {
                target: LinkTarget::Folder("/home/user/docs".to_string()),
            },
            Justification::Fill,
        )
        .unwrap();

    tree.buffer_mut(child)
        .unwrap()
        .insert(0, "let x = 1 < 2;\n\tlet y = \"tab\";\n")
        .unwrap();
    tree.buffer_mut(plain).unwrap().insert(0, "plain text only").unwrap();
    tree.set_read_only(plain, true).unwrap();
    tree.set_tags(root, ["alpha beta", "gamma"]).unwrap();
    tree.add_bookmark(plain).unwrap();
    tree.add_bookmark(root).unwrap();
    (tree, root, child)
}

#[test]
fn full_document_round_trips_exactly() {
    let (tree, _, _) = rich_document();
    let bytes = serialize_tree(&tree).unwrap();
    let parsed = deserialize(&bytes).unwrap();
    assert_eq!(parsed, tree);
    assert_eq!(parsed.bookmarks(), tree.bookmarks());
    assert_eq!(serialize_tree(&parsed).unwrap(), bytes);
}

#[test]
fn serialized_output_is_readable_xml() {
    let (tree, _, _) = rich_document();
    let xml = String::from_utf8(serialize_tree(&tree).unwrap()).unwrap();
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("<notetree>"));
    assert!(xml.contains("name=\"Project &lt;notes&gt;\""));
    assert!(xml.contains("syntax_highlighting=\"rust\""));
    assert!(xml.contains("<bookmarks list=\"3,1\""));
}

#[test]
fn subtree_serialization_keeps_children_only_under_root() {
    let (tree, root, child) = rich_document();
    let parsed = deserialize(&serialize_subtree(&tree, root).unwrap()).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed.roots(), &[root]);
    assert_eq!(parsed.children(root).unwrap(), &[child]);
    assert_eq!(parsed.node(child).unwrap(), tree.node(child).unwrap());
    assert!(parsed.bookmarks().is_empty());
}

#[test]
fn node_selection_rebases_objects() {
    let mut tree = DocumentTree::new();
    let id = tree.add_top_level("Sel", SyntaxKind::RichText).unwrap();
    let buffer = tree.buffer_mut(id).unwrap();
    buffer.insert(0, "0123456789").unwrap();
    buffer
        .place_embedded(6, EmbeddedKind::Anchor { name: "mid".to_string() }, Justification::Left)
        .unwrap();
    buffer.apply_tag("weight_heavy", 4, 8).unwrap();

    let parsed = deserialize(&serialize_node(&tree, id, Some(4..9)).unwrap()).unwrap();
    let buffer = parsed.buffer(id).unwrap();
    assert_eq!(buffer.plain_text(), "4567");
    assert_eq!(buffer.embedded().get(2).unwrap().kind, EmbeddedKind::Anchor {
        name: "mid".to_string()
    });
    assert!(buffer.tags_at(0).unwrap().contains("weight_heavy"));
    assert!(buffer.tags_at(4).unwrap().is_empty());

    assert!(matches!(
        serialize_node(&tree, id, Some(5..40)),
        Err(SerializeError::Tree(TreeError::Buffer(_)))
    ));
    assert_eq!(
        serialize_node(&tree, NodeId(99), None),
        Err(SerializeError::Tree(TreeError::NodeNotFound(NodeId(99))))
    );
}

#[test]
fn missing_attributes_fall_back_to_defaults() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<notetree>
  <node>
    <rich_text>hello</rich_text>
    <node name="Kid" unique_id="7"/>
  </node>
</notetree>"#;
    let tree = deserialize(xml.as_bytes()).unwrap();
    assert_eq!(tree.len(), 2);
    let root = tree.roots()[0];
    let node = tree.node(root).unwrap();
    assert_eq!(node.name, "Untitled");
    assert_eq!(root, NodeId(8));
    assert!(node.syntax().is_rich_text());
    assert!(!node.read_only);
    assert!(node.tags.is_empty());
    assert_eq!(node.buffer.plain_text(), "hello");
    assert_eq!(tree.children(root).unwrap(), &[NodeId(7)]);
    assert_eq!(tree.next_id(), NodeId(9));
}

#[test]
fn malformed_inputs_are_reported() {
    let cases: Vec<(&str, fn(&MalformedReason) -> bool)> = vec![
        ("<notetree><node>", |reason| {
            matches!(reason, MalformedReason::Xml(_))
        }),
        ("<other/>", |reason| {
            matches!(reason, MalformedReason::UnexpectedElement(name) if name == "other")
        }),
        (
            r#"<notetree><node><rich_text sparkle="yes">x</rich_text></node></notetree>"#,
            |reason| matches!(reason, MalformedReason::UnknownTag(tag) if tag == "sparkle_yes"),
        ),
        (
            r#"<notetree><node><rich_text weight="light">x</rich_text></node></notetree>"#,
            |reason| matches!(reason, MalformedReason::UnknownTag(_)),
        ),
        (
            r#"<notetree><node><rich_text>ab</rich_text><anchor offset="1" name="a"/><anchor offset="1" name="b"/></node></notetree>"#,
            |reason| matches!(reason, MalformedReason::OffsetCollision(1)),
        ),
        (
            r#"<notetree><node><rich_text>ab</rich_text><anchor offset="5" name="a"/></node></notetree>"#,
            |reason| matches!(reason, MalformedReason::OffsetOutOfRange { offset: 5, len: 2 }),
        ),
        (
            r#"<notetree><node><anchor name="a"/></node></notetree>"#,
            |reason| matches!(reason, MalformedReason::MissingAttribute { .. }),
        ),
        (
            r#"<notetree><node><image offset="0">!!not base64!!</image></node></notetree>"#,
            |reason| matches!(reason, MalformedReason::InvalidPayload(_)),
        ),
        (
            r#"<notetree><node unique_id="2"/><node unique_id="2"/></notetree>"#,
            |reason| matches!(reason, MalformedReason::DuplicateId(NodeId(2))),
        ),
        (
            r#"<notetree><node unique_id="abc"/></notetree>"#,
            |reason| matches!(reason, MalformedReason::InvalidAttribute { .. }),
        ),
        ("<notetree>stray text</notetree>", |reason| {
            matches!(reason, MalformedReason::UnexpectedText)
        }),
    ];
    for (xml, check) in cases {
        match deserialize(xml.as_bytes()) {
            Err(SerializeError::MalformedDocument(reason)) => {
                assert!(check(&reason), "{xml}: unexpected reason {reason:?}")
            }
            other => panic!("{xml}: expected malformed document, got {other:?}"),
        }
    }
}

#[test]
fn invalid_utf8_is_malformed() {
    assert_eq!(
        deserialize(&[0x3c, 0xff, 0xfe]),
        Err(SerializeError::MalformedDocument(MalformedReason::InvalidUtf8))
    );
}
