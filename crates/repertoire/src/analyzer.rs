//! Classifies the plies of a played game against a repertoire.
//!
//! A cursor follows the game through the tree by exact move label. Once the
//! game leaves the tree it never comes back, so every later ply is classified
//! by mover alone.

use chess_core::{ParsedGame, Ply};
use serde::Serialize;
use tracing::debug;

use crate::error::RepertoireError;
use crate::tree::Repertoire;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlyClassification {
    /// The move follows the repertoire.
    InRepertoire,
    /// The repertoire owner played something else. `expected_move` is a move
    /// the repertoire has at the point of divergence, if any.
    OutOfRepertoire { expected_move: Option<String> },
    /// The opponent played a move the repertoire does not cover.
    OpponentNew,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GameReport {
    pub classifications: Vec<PlyClassification>,
    /// Index of the first ply that left the repertoire
    pub divergence_ply: Option<usize>,
    pub in_repertoire: usize,
    pub out_of_repertoire: usize,
    pub opponent_new: usize,
}

impl GameReport {
    fn push(&mut self, classification: PlyClassification) {
        match classification {
            PlyClassification::InRepertoire => self.in_repertoire += 1,
            PlyClassification::OutOfRepertoire { .. } => self.out_of_repertoire += 1,
            PlyClassification::OpponentNew => self.opponent_new += 1,
        }
        self.classifications.push(classification);
    }

    /// The first classification at or after divergence, i.e. who left the book.
    pub fn divergence(&self) -> Option<&PlyClassification> {
        self.divergence_ply.and_then(|i| self.classifications.get(i))
    }
}

/// Classify every ply of one game, in order.
pub fn analyze_game(tree: &Repertoire, plies: &[Ply]) -> Result<GameReport, RepertoireError> {
    if plies.is_empty() {
        return Err(RepertoireError::InvalidInputSequence("game has no moves"));
    }

    let mut report = GameReport::default();
    let mut cursor = tree.root_id();
    let mut diverged = false;

    for (i, ply) in plies.iter().enumerate() {
        let owner_moved = ply.mover == tree.color;

        if diverged {
            report.push(if owner_moved {
                PlyClassification::OutOfRepertoire {
                    expected_move: None,
                }
            } else {
                PlyClassification::OpponentNew
            });
            continue;
        }

        if let Some(child) = tree.child_by_move(cursor, &ply.san) {
            cursor = child.id;
            report.push(PlyClassification::InRepertoire);
            continue;
        }

        diverged = true;
        report.divergence_ply = Some(i);
        report.push(if owner_moved {
            let expected_move = tree
                .children(cursor)
                .first()
                .and_then(|c| c.mv.clone());
            PlyClassification::OutOfRepertoire { expected_move }
        } else {
            PlyClassification::OpponentNew
        });
    }

    debug!(
        plies = plies.len(),
        divergence = ?report.divergence_ply,
        "Analyzed game against repertoire"
    );
    Ok(report)
}

/// Analyze a batch of parsed games. Each game gets its own result.
pub fn analyze_games<'a>(
    tree: &Repertoire,
    games: &'a [ParsedGame],
) -> Vec<(&'a ParsedGame, Result<GameReport, RepertoireError>)> {
    games
        .iter()
        .map(|game| (game, analyze_game(tree, &game.plies)))
        .collect()
}
