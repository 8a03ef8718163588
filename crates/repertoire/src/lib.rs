//! Opening repertoire engine: move trees and their mutations, game analysis
//! against a repertoire, and reconciliation of recognized video positions into
//! move-tree fragments.

pub mod analyzer;
pub mod error;
pub mod merge;
pub mod mutator;
pub mod progress;
pub mod reconciler;
pub mod service;
pub mod store;
pub mod task;
pub mod tree;

pub use analyzer::{analyze_game, analyze_games, GameReport, PlyClassification};
pub use error::RepertoireError;
pub use merge::merge_repertoires;
pub use mutator::{add_line, add_node, delete_node, extract_subtree, graft_fragment, import_game, set_comment};
pub use progress::{ProgressEvent, ProgressRegistry, ProgressReporter, ProgressSubscription, TaskId, TaskStatus};
pub use reconciler::{
    reconcile, Fragment, PositionSample, ReconcileOptions, ReconcileOutcome, Reconciliation,
    UnlinkedGap,
};
pub use service::RepertoireService;
pub use store::{FileStore, MemoryStore, RepertoireStore, RepertoireSummary};
pub use task::{ReconcileTask, TaskRunner};
pub use tree::{Node, NodeId, Repertoire, RepertoireId, TreeMetadata};
