use notetree_core::{
    DocumentTree, EmbeddedKind, IdPolicy, Justification, LinkTarget, NodeId, SyntaxKind,
    TreeError,
};

fn names(tree: &DocumentTree, ids: &[NodeId]) -> Vec<String> {
    ids.iter()
        .map(|id| tree.node(*id).unwrap().name.clone())
        .collect()
}

#[test]
fn siblings_are_inserted_after_their_anchor() {
    let mut tree = DocumentTree::new();
    let a = tree.add_top_level("A", SyntaxKind::RichText).unwrap();
    let b = tree.add_top_level("B", SyntaxKind::RichText).unwrap();
    tree.add_sibling(a, "After A", SyntaxKind::RichText).unwrap();
    let child = tree.add_child(b, "  Child  ", SyntaxKind::PlainText).unwrap();

    assert_eq!(names(&tree, tree.roots()), vec!["A", "After A", "B"]);
    assert_eq!(tree.children(b).unwrap(), &[child]);
    assert_eq!(tree.node(child).unwrap().name, "Child");
    assert_eq!(tree.hierarchical_name(child, "/").unwrap(), "B/Child");
    assert_eq!(tree.depth(child).unwrap(), 1);
}

#[test]
fn blank_names_are_rejected() {
    let mut tree = DocumentTree::new();
    assert_eq!(
        tree.add_top_level("   ", SyntaxKind::RichText),
        Err(TreeError::InvalidName)
    );
    let id = tree.add_top_level("Named", SyntaxKind::RichText).unwrap();
    assert_eq!(tree.rename(id, ""), Err(TreeError::InvalidName));
    tree.rename(id, " Renamed ").unwrap();
    assert_eq!(tree.node(id).unwrap().name, "Renamed");
}

#[test]
fn ids_are_never_reused_after_delete() {
    let mut tree = DocumentTree::new();
    let first = tree.add_top_level("First", SyntaxKind::RichText).unwrap();
    let second = tree.add_top_level("Second", SyntaxKind::RichText).unwrap();
    tree.delete_node(second).unwrap();
    let third = tree.add_top_level("Third", SyntaxKind::RichText).unwrap();
    assert!(third > second);
    assert!(second > first);
    assert!(tree.get(second).is_none());
}

#[test]
fn moves_reject_cycles_and_foreign_siblings() {
    let mut tree = DocumentTree::new();
    let root = tree.add_top_level("Root", SyntaxKind::RichText).unwrap();
    let child = tree.add_child(root, "Child", SyntaxKind::RichText).unwrap();
    let grandchild = tree.add_child(child, "Grandchild", SyntaxKind::RichText).unwrap();
    let other = tree.add_top_level("Other", SyntaxKind::RichText).unwrap();

    assert_eq!(
        tree.move_node(root, Some(grandchild), None),
        Err(TreeError::CycleDetected {
            node: root,
            parent: grandchild
        })
    );
    assert!(matches!(
        tree.move_node(child, None, Some(grandchild)),
        Err(TreeError::NotASibling { .. })
    ));

    tree.move_node(child, None, Some(root)).unwrap();
    assert_eq!(tree.roots(), &[root, child, other]);
    assert_eq!(tree.parent(child).unwrap(), None);
    assert!(tree.children(root).unwrap().is_empty());
    assert_eq!(tree.children(child).unwrap(), &[grandchild]);

    tree.move_node(other, Some(child), None).unwrap();
    assert_eq!(tree.children(child).unwrap(), &[other, grandchild]);
}

#[test]
fn move_up_and_down_stop_at_the_ends() {
    let mut tree = DocumentTree::new();
    let a = tree.add_top_level("A", SyntaxKind::RichText).unwrap();
    let b = tree.add_top_level("B", SyntaxKind::RichText).unwrap();
    assert!(!tree.move_up(a).unwrap());
    assert!(tree.move_up(b).unwrap());
    assert_eq!(tree.roots(), &[b, a]);
    assert!(!tree.move_down(a).unwrap());
}

#[test]
fn delete_removes_subtree_and_bookmarks() {
    let mut tree = DocumentTree::new();
    let root = tree.add_top_level("Root", SyntaxKind::RichText).unwrap();
    let child = tree.add_child(root, "Child", SyntaxKind::RichText).unwrap();
    let leaf = tree.add_child(child, "Leaf", SyntaxKind::RichText).unwrap();
    let keep = tree.add_top_level("Keep", SyntaxKind::RichText).unwrap();
    tree.add_bookmark(leaf).unwrap();
    tree.add_bookmark(keep).unwrap();
    assert!(!tree.add_bookmark(keep).unwrap());

    let removed = tree.delete_node(root).unwrap();
    assert_eq!(removed, vec![root, child, leaf]);
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.bookmarks(), &[keep]);
    assert_eq!(tree.delete_node(root), Err(TreeError::NodeNotFound(root)));
}

#[test]
fn duplicate_copies_subtree_with_fresh_ids() {
    let mut tree = DocumentTree::new();
    let root = tree.add_top_level("Root", SyntaxKind::RichText).unwrap();
    let child = tree.add_child(root, "Child", SyntaxKind::RichText).unwrap();
    tree.buffer_mut(child).unwrap().insert(0, "payload").unwrap();
    let after = tree.add_top_level("After", SyntaxKind::RichText).unwrap();

    let copy = tree.duplicate_node(root).unwrap();
    assert_eq!(tree.roots(), &[root, copy, after]);
    let copied_children = tree.children(copy).unwrap().to_vec();
    assert_eq!(copied_children.len(), 1);
    assert_ne!(copied_children[0], child);
    assert_eq!(tree.parent(copied_children[0]).unwrap(), Some(copy));
    assert_eq!(
        tree.buffer(copied_children[0]).unwrap().plain_text(),
        "payload"
    );
}

#[test]
fn lossy_syntax_change_needs_confirmation() {
    let mut tree = DocumentTree::new();
    let id = tree.add_top_level("Rich", SyntaxKind::RichText).unwrap();
    let buffer = tree.buffer_mut(id).unwrap();
    buffer.insert(0, "bold text").unwrap();
    buffer.apply_tag("weight_heavy", 0, 4).unwrap();
    buffer
        .place_embedded(9, EmbeddedKind::Anchor { name: "end".to_string() }, Justification::Left)
        .unwrap();

    assert_eq!(
        tree.change_syntax(id, SyntaxKind::PlainText, false),
        Err(TreeError::LossyConversion {
            node: id,
            objects: 1
        })
    );
    assert!(tree.node(id).unwrap().syntax().is_rich_text());

    tree.change_syntax(id, SyntaxKind::PlainText, true).unwrap();
    let buffer = tree.buffer(id).unwrap();
    assert_eq!(*buffer.syntax(), SyntaxKind::PlainText);
    assert_eq!(buffer.plain_text(), "bold text");
    assert!(buffer.embedded().is_empty());
}

#[test]
fn inherit_syntax_converts_descendants() {
    let mut tree = DocumentTree::new();
    let root = tree
        .add_top_level("Code", SyntaxKind::Code("python".to_string()))
        .unwrap();
    let child = tree.add_child(root, "Child", SyntaxKind::RichText).unwrap();
    let same = tree
        .add_child(root, "Same", SyntaxKind::Code("python".to_string()))
        .unwrap();

    let changed = tree.inherit_syntax(root).unwrap();
    assert_eq!(changed, vec![child]);
    assert_eq!(
        *tree.node(child).unwrap().syntax(),
        SyntaxKind::Code("python".to_string())
    );
    assert_eq!(
        *tree.node(same).unwrap().syntax(),
        SyntaxKind::Code("python".to_string())
    );
}

#[test]
fn node_tags_are_split_on_whitespace() {
    let mut tree = DocumentTree::new();
    let id = tree.add_top_level("Tagged", SyntaxKind::RichText).unwrap();
    tree.set_tags(id, ["work  urgent", "home"]).unwrap();
    let tags: Vec<&str> = tree
        .node(id)
        .unwrap()
        .tags
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(tags, vec!["home", "urgent", "work"]);
}

#[test]
fn graft_preserve_rejects_colliding_ids() {
    let mut tree = DocumentTree::new();
    tree.add_top_level("Existing", SyntaxKind::RichText).unwrap();
    let mut fragment = DocumentTree::new();
    fragment.add_top_level("Incoming", SyntaxKind::RichText).unwrap();

    assert_eq!(
        tree.graft(fragment, None, IdPolicy::Preserve),
        Err(TreeError::IdCollision(NodeId(1)))
    );
    assert_eq!(tree.len(), 1);
}

#[test]
fn graft_reassign_rewrites_internal_node_links() {
    let mut tree = DocumentTree::new();
    let host = tree.add_top_level("Host", SyntaxKind::RichText).unwrap();
    tree.add_top_level("Filler", SyntaxKind::RichText).unwrap();

    let mut fragment = DocumentTree::new();
    let source = fragment.add_top_level("Source", SyntaxKind::RichText).unwrap();
    let target = fragment.add_top_level("Target", SyntaxKind::RichText).unwrap();
    let link = LinkTarget::Node {
        id: target,
        anchor: None,
    };
    let buffer = fragment.buffer_mut(source).unwrap();
    buffer.insert(0, "jump").unwrap();
    buffer
        .apply_tag(&format!("link_{}", link.to_value()), 0, 4)
        .unwrap();
    buffer
        .place_embedded(4, EmbeddedKind::LinkMarker { target: link }, Justification::Left)
        .unwrap();

    let grafted = tree.graft(fragment, Some(host), IdPolicy::Reassign).unwrap();
    assert_eq!(grafted.len(), 2);
    assert_eq!(tree.children(host).unwrap(), &grafted[..]);
    let (new_source, new_target) = (grafted[0], grafted[1]);
    assert!(new_source.0 > 2 && new_target.0 > 2);

    let buffer = tree.buffer(new_source).unwrap();
    let expected = LinkTarget::Node {
        id: new_target,
        anchor: None,
    };
    assert!(buffer
        .tags_at(0)
        .unwrap()
        .contains(&format!("link_{}", expected.to_value())));
    assert_eq!(
        buffer.embedded().get(4).unwrap().kind,
        EmbeddedKind::LinkMarker { target: expected }
    );
    assert!(tree.next_id().0 > new_target.0);
}
