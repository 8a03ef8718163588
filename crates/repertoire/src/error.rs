//! Repertoire error types

use thiserror::Error;

use crate::tree::{NodeId, RepertoireId};

#[derive(Error, Debug)]
pub enum RepertoireError {
    #[error("Parent node not found: {0}")]
    ParentNotFound(NodeId),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Invalid move '{san}': {reason}")]
    InvalidMove { san: String, reason: String },

    #[error("Move '{0}' already exists at this position")]
    MoveExists(String),

    #[error("Cannot delete the root node")]
    CannotDeleteRoot,

    #[error("Cannot extract the root node")]
    CannotExtractRoot,

    #[error("All repertoires must be for the same color")]
    ColorMismatch,

    #[error("The same repertoire was given more than once")]
    DuplicateSources,

    #[error("Repertoire limit reached ({0})")]
    LimitReached(usize),

    #[error("Invalid input sequence: {0}")]
    InvalidInputSequence(&'static str),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Position mismatch: expected {expected}, found {found}")]
    PositionMismatch { expected: String, found: String },

    #[error("Repertoire not found: {0}")]
    RepertoireNotFound(RepertoireId),

    #[error("Tree invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Storage error: {0}")]
    Store(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    TaskJoin(String),
}
