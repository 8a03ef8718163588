//! Merging repertoires by move label.

mod common;

use chess_core::Side;
use common::repertoire;
use repertoire::{merge_repertoires, RepertoireError, RepertoireId};

#[test]
fn test_merge_with_itself_is_identity() {
    let mut tree = repertoire(
        "Najdorf",
        Side::Black,
        &[&["e4", "c5", "Nf3", "d6", "d4", "cxd4", "Nxd4", "Nf6", "Nc3", "a6"], &["e4", "c5", "Nc3", "Nc6"], &["d4", "Nf6"]],
    );
    tree.id = Some(RepertoireId(1));
    let mut copy = tree.clone();
    copy.id = Some(RepertoireId(2));

    let merged = merge_repertoires(&[&tree, &copy], "Najdorf again").unwrap();
    assert!(merged.same_shape(&tree));
    assert_eq!(merged.metadata(), tree.metadata());
    assert_eq!(merged.color, Side::Black);
}

#[test]
fn test_merge_is_a_union_without_duplicate_children() {
    let a = repertoire("a", Side::White, &[&["e4", "e5", "Nf3"], &["d4"]]);
    let b = repertoire("b", Side::White, &[&["e4", "e5", "Nf3", "Nc6"], &["c4"]]);
    let c = repertoire("c", Side::White, &[&["e4", "c5"]]);

    let merged = merge_repertoires(&[&a, &b, &c], "all").unwrap();
    // root, e4, e5, Nf3, Nc6, c5, d4, c4
    assert_eq!(merged.metadata().total_nodes, 8);
    assert_eq!(merged.metadata().deepest_depth, 4);
    assert!(merged.verify().is_ok());

    let root_moves: Vec<_> = merged
        .children(merged.root_id())
        .into_iter()
        .filter_map(|n| n.mv.clone())
        .collect();
    assert_eq!(root_moves, vec!["e4", "d4", "c4"]);

    // Sources are left as they were
    assert_eq!(a.metadata().total_nodes, 5);
}

#[test]
fn test_merge_rejects_mixed_colors() {
    let white = repertoire("w", Side::White, &[&["e4"]]);
    let black = repertoire("b", Side::Black, &[&["e4", "e5"]]);
    assert!(matches!(
        merge_repertoires(&[&white, &black], "x"),
        Err(RepertoireError::ColorMismatch)
    ));
}
