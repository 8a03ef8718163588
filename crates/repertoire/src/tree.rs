//! Move tree data model.
//!
//! Nodes live in an arena keyed by a stable `NodeId`. Ownership flows from the
//! root down through `children`; `parent` is an id used for lookups only.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chess_core::position::{same_placement, STARTING_FEN};
use chess_core::{ChessRules, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RepertoireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(NodeId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepertoireId(pub u64);

impl fmt::Display for RepertoireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RepertoireId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(RepertoireId)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Full FEN of this position
    pub position: String,
    /// SAN of the move from the parent; `None` only for the root
    #[serde(rename = "move")]
    pub mv: Option<String>,
    pub ply: u32,
    pub parent: Option<NodeId>,
    /// Insertion order, significant for display only
    pub children: Vec<NodeId>,
    pub comment: Option<String>,
}

impl Node {
    fn root(id: NodeId, position: String) -> Self {
        Self {
            id,
            position,
            mv: None,
            ply: 0,
            parent: None,
            children: Vec::new(),
            comment: None,
        }
    }

    /// Read from the position itself. Follows ply parity only while the root is
    /// a white-to-move position; an extracted or reconciled tree rooted on a
    /// black-to-move position is offset by one.
    pub fn side_to_move(&self) -> Side {
        self.position
            .split_whitespace()
            .nth(1)
            .and_then(|field| field.parse().ok())
            .unwrap_or_else(|| Side::for_ply(self.ply))
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMetadata {
    pub total_nodes: usize,
    pub total_moves: usize,
    pub deepest_depth: u32,
}

impl TreeMetadata {
    fn from_counts(total_nodes: usize, deepest_depth: u32) -> Self {
        Self {
            total_nodes,
            total_moves: total_nodes.saturating_sub(1),
            deepest_depth,
        }
    }

    /// Metadata after appending a node at `ply`.
    pub(crate) fn with_added(self, ply: u32) -> Self {
        Self::from_counts(self.total_nodes + 1, self.deepest_depth.max(ply))
    }
}

#[derive(Serialize, Deserialize)]
struct ArenaRecord {
    root: NodeId,
    next_id: u64,
    nodes: Vec<Node>,
}

/// Arena of nodes shared by repertoires and reconciled fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ArenaRecord", into = "ArenaRecord")]
pub(crate) struct NodeArena {
    root: NodeId,
    nodes: BTreeMap<NodeId, Node>,
    next_id: u64,
}

impl From<ArenaRecord> for NodeArena {
    fn from(record: ArenaRecord) -> Self {
        Self {
            root: record.root,
            nodes: record.nodes.into_iter().map(|n| (n.id, n)).collect(),
            next_id: record.next_id,
        }
    }
}

impl From<NodeArena> for ArenaRecord {
    fn from(arena: NodeArena) -> Self {
        Self {
            root: arena.root,
            next_id: arena.next_id,
            nodes: arena.nodes.into_values().collect(),
        }
    }
}

impl NodeArena {
    pub(crate) fn new(root_position: String) -> Self {
        let root = NodeId(0);
        let mut nodes = BTreeMap::new();
        nodes.insert(root, Node::root(root, root_position));
        Self {
            root,
            nodes,
            next_id: 1,
        }
    }

    pub(crate) fn root_id(&self) -> NodeId {
        self.root
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn child_by_move(&self, parent: NodeId, san: &str) -> Option<&Node> {
        self.get(parent)?
            .children
            .iter()
            .filter_map(|id| self.get(*id))
            .find(|child| child.mv.as_deref() == Some(san))
    }

    /// Appends a child as the last entry of `parent.children`.
    /// Callers check that the parent exists and the move is not a duplicate.
    pub(crate) fn push_child(&mut self, parent: NodeId, san: String, position: String) -> NodeId {
        let ply = self.get(parent).map(|p| p.ply + 1).unwrap_or(1);
        let id = NodeId(self.next_id);
        self.next_id += 1;

        self.nodes.insert(
            id,
            Node {
                id,
                position,
                mv: Some(san),
                ply,
                parent: Some(parent),
                children: Vec::new(),
                comment: None,
            },
        );
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        id
    }

    /// Unlinks `id` from its parent and drops it with its whole subtree.
    /// Returns the number of nodes removed.
    pub(crate) fn detach(&mut self, id: NodeId) -> usize {
        let parent = self.get(id).and_then(|n| n.parent);
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != id);
        }

        let mut stack = vec![id];
        let mut removed = 0;
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
                removed += 1;
            }
        }
        removed
    }

    /// Nodes reachable from the root, parent before children, children in order.
    pub(crate) fn preorder(&self) -> PreOrder<'_> {
        PreOrder {
            arena: self,
            stack: vec![self.root],
        }
    }

    pub(crate) fn compute_metadata(&self) -> TreeMetadata {
        let (count, deepest) = self
            .preorder()
            .fold((0usize, 0u32), |(count, deepest), node| {
                (count + 1, deepest.max(node.ply))
            });
        TreeMetadata::from_counts(count, deepest)
    }

    /// Copies the subtree at `from` into a fresh arena rooted at that node.
    /// Plies restart from 0; positions, moves below the root, and comments are kept.
    pub(crate) fn copy_subtree(&self, from: NodeId) -> Option<NodeArena> {
        let source_root = self.get(from)?;
        let mut copy = NodeArena::new(source_root.position.clone());
        let copy_root = copy.root_id();
        if let Some(root) = copy.get_mut(copy_root) {
            root.comment = source_root.comment.clone();
        }

        let mut stack = vec![(from, copy_root)];
        while let Some((src, dst)) = stack.pop() {
            let Some(node) = self.get(src) else { continue };
            for child_id in &node.children {
                let Some(child) = self.get(*child_id) else { continue };
                let san = child.mv.clone().unwrap_or_default();
                let new_id = copy.push_child(dst, san, child.position.clone());
                if let Some(new_node) = copy.get_mut(new_id) {
                    new_node.comment = child.comment.clone();
                }
                stack.push((*child_id, new_id));
            }
        }
        Some(copy)
    }

    /// Moves from the root to `id`.
    pub(crate) fn line_to(&self, id: NodeId) -> Option<Vec<String>> {
        let mut line = Vec::new();
        let mut current = self.get(id)?;
        while let Some(parent) = current.parent {
            if let Some(mv) = &current.mv {
                line.push(mv.clone());
            }
            current = self.get(parent)?;
        }
        line.reverse();
        Some(line)
    }

    /// Checks structural invariants: root shape, unique child moves,
    /// ply/parent consistency, and that every stored node is reachable.
    pub(crate) fn verify(&self) -> Result<(), RepertoireError> {
        let violation = |msg: String| Err(RepertoireError::InvariantViolation(msg));

        let Some(root) = self.get(self.root) else {
            return violation("root node missing".into());
        };
        if root.mv.is_some() || root.parent.is_some() || root.ply != 0 {
            return violation("root must have no move, no parent, and ply 0".into());
        }

        let mut reachable = 0usize;
        for node in self.preorder() {
            reachable += 1;
            let mut seen_moves: Vec<&str> = Vec::with_capacity(node.children.len());
            for child_id in &node.children {
                let Some(child) = self.get(*child_id) else {
                    return violation(format!("node {} lists missing child {child_id}", node.id));
                };
                let Some(mv) = child.mv.as_deref() else {
                    return violation(format!("non-root node {child_id} has no move"));
                };
                if seen_moves.contains(&mv) {
                    return violation(format!("node {} has two children for '{mv}'", node.id));
                }
                seen_moves.push(mv);
                if child.parent != Some(node.id) {
                    return violation(format!("node {child_id} has wrong parent"));
                }
                if child.ply != node.ply + 1 {
                    return violation(format!("node {child_id} has ply {} under ply {}", child.ply, node.ply));
                }
            }
        }

        if reachable != self.nodes.len() {
            return violation(format!(
                "{} nodes stored but {reachable} reachable",
                self.nodes.len()
            ));
        }
        Ok(())
    }

    pub(crate) fn find_by_placement(&self, position: &str) -> Vec<&Node> {
        self.preorder()
            .filter(|n| same_placement(&n.position, position))
            .collect()
    }

    pub(crate) fn nodes_newest_first(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().rev()
    }
}

pub struct PreOrder<'a> {
    arena: &'a NodeArena,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if let Some(node) = self.arena.get(id) {
                self.stack.extend(node.children.iter().rev().copied());
                return Some(node);
            }
        }
        None
    }
}

/// A repertoire: the move tree for one color plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repertoire {
    /// Assigned by the store on first save.
    pub id: Option<RepertoireId>,
    pub name: String,
    pub color: Side,
    pub(crate) arena: NodeArena,
    pub(crate) metadata: TreeMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repertoire {
    /// New repertoire with a single root at the standard starting position.
    pub fn new(name: impl Into<String>, color: Side) -> Self {
        Self::from_arena(name, color, NodeArena::new(STARTING_FEN.to_string()))
    }

    /// New repertoire rooted at an arbitrary position, e.g. a prepared line.
    pub fn with_root_position(
        name: impl Into<String>,
        color: Side,
        rules: &dyn ChessRules,
        position: &str,
    ) -> Result<Self, RepertoireError> {
        let position = rules
            .canonical_position(position)
            .map_err(|e| RepertoireError::InvalidPosition(e.to_string()))?;
        Ok(Self::from_arena(name, color, NodeArena::new(position)))
    }

    pub(crate) fn from_arena(name: impl Into<String>, color: Side, arena: NodeArena) -> Self {
        let now = Utc::now();
        let metadata = arena.compute_metadata();
        Self {
            id: None,
            name: name.into(),
            color,
            arena,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn root_id(&self) -> NodeId {
        self.arena.root_id()
    }

    pub fn root(&self) -> &Node {
        // The arena always holds its root
        self.arena
            .get(self.arena.root_id())
            .unwrap_or_else(|| unreachable!("repertoire without root"))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some()
    }

    pub fn children(&self, id: NodeId) -> Vec<&Node> {
        self.arena
            .get(id)
            .map(|n| n.children.iter().filter_map(|c| self.arena.get(*c)).collect())
            .unwrap_or_default()
    }

    pub fn child_by_move(&self, id: NodeId, san: &str) -> Option<&Node> {
        self.arena.child_by_move(id, san)
    }

    pub fn metadata(&self) -> TreeMetadata {
        self.metadata
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        // A repertoire always has its root
        false
    }

    pub fn iter(&self) -> PreOrder<'_> {
        self.arena.preorder()
    }

    /// SAN moves leading from the root to `id`.
    pub fn line_to(&self, id: NodeId) -> Option<Vec<String>> {
        self.arena.line_to(id)
    }

    /// Nodes whose piece placement matches `position`; transpositions yield several.
    pub fn find_by_position(&self, position: &str) -> Vec<&Node> {
        self.arena.find_by_placement(position)
    }

    /// Checks all structural invariants and that the stored metadata is current.
    pub fn verify(&self) -> Result<(), RepertoireError> {
        self.arena.verify()?;
        let actual = self.arena.compute_metadata();
        if actual != self.metadata {
            return Err(RepertoireError::InvariantViolation(format!(
                "metadata {:?} does not match tree {:?}",
                self.metadata, actual
            )));
        }
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn recompute_metadata(&mut self) {
        self.metadata = self.arena.compute_metadata();
    }

    /// Whether two repertoires hold the same shape: moves, positions, and
    /// child order, ignoring node ids, names, and timestamps.
    pub fn same_shape(&self, other: &Repertoire) -> bool {
        fn walk(a: &Repertoire, an: &Node, b: &Repertoire, bn: &Node) -> bool {
            if an.mv != bn.mv || an.position != bn.position || an.children.len() != bn.children.len() {
                return false;
            }
            an.children.iter().zip(&bn.children).all(|(ac, bc)| {
                match (a.node(*ac), b.node(*bc)) {
                    (Some(x), Some(y)) => walk(a, x, b, y),
                    _ => false,
                }
            })
        }
        self.color == other.color && walk(self, self.root(), other, other.root())
    }
}
