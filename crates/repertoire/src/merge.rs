//! Merging repertoires by move label.
//!
//! All sources are walked in lock-step from their roots. At each aligned node
//! every distinct child move across the sources becomes one merged child, and
//! the sources that share that move are followed into it. Sources never produce
//! two children with the same move at one node.

use tracing::debug;

use crate::error::RepertoireError;
use crate::tree::{NodeArena, NodeId, Repertoire};

fn same_source(a: &Repertoire, b: &Repertoire) -> bool {
    match (a.id, b.id) {
        (Some(x), Some(y)) => x == y,
        _ => std::ptr::eq(a, b),
    }
}

fn check_sources(trees: &[&Repertoire]) -> Result<(), RepertoireError> {
    if trees.len() < 2 {
        return Err(RepertoireError::InvalidInputSequence(
            "merging needs at least two repertoires",
        ));
    }

    let color = trees[0].color;
    if trees.iter().any(|t| t.color != color) {
        return Err(RepertoireError::ColorMismatch);
    }

    for (i, a) in trees.iter().enumerate() {
        if trees[i + 1..].iter().any(|b| same_source(a, b)) {
            return Err(RepertoireError::DuplicateSources);
        }
    }
    Ok(())
}

/// Merge `trees` into a new, unsaved repertoire named `new_name`.
///
/// The root position comes from the first tree. When sources disagree on a
/// node's comment, the first source (in argument order) with a comment wins.
pub fn merge_repertoires(
    trees: &[&Repertoire],
    new_name: &str,
) -> Result<Repertoire, RepertoireError> {
    check_sources(trees)?;

    let first = trees[0];
    let mut arena = NodeArena::new(first.root().position.clone());
    let merged_root = arena.root_id();
    if let Some(root) = arena.get_mut(merged_root) {
        root.comment = trees.iter().find_map(|t| t.root().comment.clone());
    }

    // (merged node, aligned source nodes)
    let mut stack: Vec<(NodeId, Vec<(&Repertoire, NodeId)>)> =
        vec![(merged_root, trees.iter().map(|t| (*t, t.root_id())).collect())];

    while let Some((target, sources)) = stack.pop() {
        // Distinct moves in first-seen order: source order, then child order
        let mut moves: Vec<&str> = Vec::new();
        for (tree, node) in &sources {
            for child in tree.children(*node) {
                if let Some(mv) = child.mv.as_deref() {
                    if !moves.contains(&mv) {
                        moves.push(mv);
                    }
                }
            }
        }

        let mut next = Vec::with_capacity(moves.len());
        for mv in moves {
            let aligned: Vec<(&Repertoire, NodeId)> = sources
                .iter()
                .filter_map(|(tree, node)| tree.child_by_move(*node, mv).map(|c| (*tree, c.id)))
                .collect();
            let Some((lead_tree, lead_node)) = aligned.first().copied() else {
                continue;
            };
            let position = lead_tree
                .node(lead_node)
                .map(|n| n.position.clone())
                .unwrap_or_default();

            let child = arena.push_child(target, mv.to_string(), position);
            let comment = aligned
                .iter()
                .find_map(|(tree, node)| tree.node(*node).and_then(|n| n.comment.clone()));
            if let Some(node) = arena.get_mut(child) {
                node.comment = comment;
            }
            next.push((child, aligned));
        }

        // Reverse so children are expanded in order
        stack.extend(next.into_iter().rev());
    }

    let merged = Repertoire::from_arena(new_name, first.color, arena);
    debug!(
        sources = trees.len(),
        nodes = merged.metadata().total_nodes,
        "Merged repertoires"
    );
    Ok(merged)
}
