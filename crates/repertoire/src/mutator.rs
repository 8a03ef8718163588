//! Structural operations on a repertoire.
//!
//! These are the only functions that create or destroy nodes. Callers must
//! serialize mutations per repertoire (see `service::RepertoireService`).

use chess_core::position::same_placement;
use chess_core::{ChessRules, Ply};
use tracing::debug;

use crate::error::RepertoireError;
use crate::reconciler::Fragment;
use crate::tree::{NodeId, Repertoire, TreeMetadata};

/// Add `san` as the last child of `parent`.
///
/// The move is validated against the parent's position and stored in canonical
/// SAN. A child with the same move is never merged silently: it fails with
/// `MoveExists`.
pub fn add_node(
    tree: &mut Repertoire,
    rules: &dyn ChessRules,
    parent: NodeId,
    san: &str,
) -> Result<NodeId, RepertoireError> {
    let parent_node = tree
        .arena
        .get(parent)
        .ok_or(RepertoireError::ParentNotFound(parent))?;

    let validated = rules
        .validate_move(&parent_node.position, san)
        .map_err(|e| RepertoireError::InvalidMove {
            san: san.to_string(),
            reason: e.to_string(),
        })?;

    if tree.arena.child_by_move(parent, &validated.san).is_some() {
        return Err(RepertoireError::MoveExists(validated.san));
    }

    let id = tree.arena.push_child(parent, validated.san, validated.position);
    let ply = tree.arena.get(id).map(|n| n.ply).unwrap_or_default();
    tree.metadata = tree.metadata.with_added(ply);
    tree.touch();

    debug!(node = %id, parent = %parent, ply, "Added node");
    Ok(id)
}

/// Remove a node and its entire subtree. Metadata is recomputed from the
/// remaining tree.
pub fn delete_node(tree: &mut Repertoire, node: NodeId) -> Result<TreeMetadata, RepertoireError> {
    if node == tree.root_id() {
        return Err(RepertoireError::CannotDeleteRoot);
    }
    if !tree.contains(node) {
        return Err(RepertoireError::NodeNotFound(node));
    }

    let removed = tree.arena.detach(node);
    tree.recompute_metadata();
    tree.touch();

    debug!(node = %node, removed, "Deleted subtree");
    Ok(tree.metadata)
}

/// Copy the subtree at `node` into a new, unsaved repertoire rooted there.
/// The source is left untouched.
pub fn extract_subtree(
    tree: &Repertoire,
    node: NodeId,
    new_name: &str,
) -> Result<Repertoire, RepertoireError> {
    if node == tree.root_id() {
        return Err(RepertoireError::CannotExtractRoot);
    }
    let arena = tree
        .arena
        .copy_subtree(node)
        .ok_or(RepertoireError::NodeNotFound(node))?;

    let extracted = Repertoire::from_arena(new_name, tree.color, arena);
    debug!(from = %node, nodes = extracted.metadata.total_nodes, "Extracted subtree");
    Ok(extracted)
}

/// Follow or create `moves` starting at `from`, reusing existing children.
///
/// Returns the node reached after each move. An illegal move stops the walk
/// with `InvalidMove`; the legal prefix stays in the tree.
pub fn add_line<S: AsRef<str>>(
    tree: &mut Repertoire,
    rules: &dyn ChessRules,
    from: NodeId,
    moves: &[S],
) -> Result<Vec<NodeId>, RepertoireError> {
    if !tree.contains(from) {
        return Err(RepertoireError::ParentNotFound(from));
    }

    let mut path = Vec::with_capacity(moves.len());
    let mut cursor = from;
    let mut created = 0usize;
    for (i, san) in moves.iter().enumerate() {
        let san = san.as_ref();
        let position = tree
            .arena
            .get(cursor)
            .map(|n| n.position.clone())
            .ok_or(RepertoireError::NodeNotFound(cursor))?;

        let validated = match rules.validate_move(&position, san) {
            Ok(validated) => validated,
            Err(e) => {
                if created > 0 {
                    tree.touch();
                }
                debug!(ply = i + 1, created, "Stopped line at illegal move");
                return Err(RepertoireError::InvalidMove {
                    san: san.to_string(),
                    reason: format!("ply {}: {e}", i + 1),
                });
            }
        };

        cursor = match tree.arena.child_by_move(cursor, &validated.san) {
            Some(existing) => existing.id,
            None => {
                let id = tree.arena.push_child(cursor, validated.san, validated.position);
                let ply = tree.arena.get(id).map(|n| n.ply).unwrap_or_default();
                tree.metadata = tree.metadata.with_added(ply);
                created += 1;
                id
            }
        };
        path.push(cursor);
    }

    tree.touch();
    Ok(path)
}

/// Add the first `max_plies` plies of a game under the root.
pub fn import_game(
    tree: &mut Repertoire,
    rules: &dyn ChessRules,
    plies: &[Ply],
    max_plies: usize,
) -> Result<Vec<NodeId>, RepertoireError> {
    if plies.is_empty() {
        return Err(RepertoireError::InvalidInputSequence("game has no moves"));
    }
    let moves: Vec<&str> = plies.iter().take(max_plies).map(|p| p.san.as_str()).collect();
    let root = tree.root_id();
    add_line(tree, rules, root, &moves)
}

/// Set or clear the free-text comment on a node.
pub fn set_comment(
    tree: &mut Repertoire,
    node: NodeId,
    comment: Option<String>,
) -> Result<(), RepertoireError> {
    let target = tree
        .arena
        .get_mut(node)
        .ok_or(RepertoireError::NodeNotFound(node))?;
    target.comment = comment.filter(|c| !c.trim().is_empty());
    tree.touch();
    Ok(())
}

/// Merge a reconciled fragment under `parent`. The fragment root must have the
/// same piece placement as `parent`. Returns the number of nodes created.
///
/// All or nothing: when a fragment move is illegal from the tree's positions
/// the tree is left unchanged.
pub fn graft_fragment(
    tree: &mut Repertoire,
    rules: &dyn ChessRules,
    parent: NodeId,
    fragment: &Fragment,
) -> Result<usize, RepertoireError> {
    let anchor = tree
        .arena
        .get(parent)
        .ok_or(RepertoireError::ParentNotFound(parent))?;
    let fragment_root = fragment.root();
    if !same_placement(&anchor.position, &fragment_root.position) {
        return Err(RepertoireError::PositionMismatch {
            expected: anchor.position.clone(),
            found: fragment_root.position.clone(),
        });
    }

    let before = tree.metadata.total_nodes;
    let mut staged = tree.clone();
    let mut stack = vec![(fragment_root.id, parent)];
    while let Some((src, dst)) = stack.pop() {
        for child in fragment.children(src) {
            let Some(san) = child.mv.as_deref() else { continue };
            let path = add_line(&mut staged, rules, dst, &[san])?;
            if let Some(&reached) = path.last() {
                stack.push((child.id, reached));
            }
        }
    }

    let added = staged.metadata.total_nodes - before;
    if added > 0 {
        *tree = staged;
    }
    debug!(parent = %parent, added, "Grafted fragment");
    Ok(added)
}
