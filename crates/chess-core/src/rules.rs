//! Chess legality capability consumed by the repertoire core.
//!
//! The core never applies moves itself; it asks a `ChessRules` implementation
//! to validate a SAN move against a position or to search for a short move
//! sequence connecting two positions.

use std::collections::{HashSet, VecDeque};

use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position};
use thiserror::Error;
use tracing::trace;

use crate::position::{
    complete_fen, is_valid_placement, normalize_fen, piece_count, placement_key, STARTING_FEN,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("Invalid position '{0}'")]
    InvalidPosition(String),

    #[error("Invalid move notation '{0}'")]
    InvalidNotation(String),

    #[error("Illegal move '{san}' in position {position}")]
    IllegalMove { san: String, position: String },
}

/// A legal move together with the position it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMove {
    /// Canonical SAN: minimal disambiguation, no check suffix.
    pub san: String,
    /// Full FEN after the move.
    pub position: String,
}

pub trait ChessRules: Send + Sync {
    /// Confirms `san` is legal in `position` and returns the resulting position.
    fn validate_move(&self, position: &str, san: &str) -> Result<ValidatedMove, RulesError>;

    /// Shortest legal move sequence (at most `max_depth` plies) from `from` to a
    /// position with the same piece placement as `to`. `Some(vec![])` when the
    /// placements already match, `None` when nothing connects within the bound.
    fn find_connecting_moves(
        &self,
        from: &str,
        to: &str,
        max_depth: usize,
    ) -> Option<Vec<ValidatedMove>>;

    /// Parses a possibly partial FEN and returns it in full form.
    fn canonical_position(&self, position: &str) -> Result<String, RulesError>;

    fn start_position(&self) -> String {
        STARTING_FEN.to_string()
    }
}

/// `ChessRules` backed by shakmaty, standard chess only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyRules;

impl ShakmatyRules {
    pub fn new() -> Self {
        Self
    }
}

fn parse_position(position: &str) -> Result<Chess, RulesError> {
    if !is_valid_placement(position) {
        return Err(RulesError::InvalidPosition(position.to_string()));
    }

    let fen: Fen = complete_fen(position)
        .parse()
        .map_err(|_| RulesError::InvalidPosition(position.to_string()))?;

    fen.into_position(CastlingMode::Standard)
        .or_else(|e| e.ignore_invalid_castling_rights())
        .map_err(|_| RulesError::InvalidPosition(position.to_string()))
}

fn fen_of(pos: &Chess) -> String {
    Fen::from_position(pos, EnPassantMode::Legal).to_string()
}

/// Strips check/annotation suffixes and accepts zero-style castling.
pub fn normalize_san(san: &str) -> String {
    let trimmed = san.trim().trim_end_matches(['+', '#', '!', '?']);
    match trimmed {
        "0-0" => "O-O".to_string(),
        "0-0-0" => "O-O-O".to_string(),
        other => other.to_string(),
    }
}

fn can_reach(pieces: usize, target_pieces: usize, plies: usize) -> bool {
    pieces >= target_pieces && pieces - target_pieces <= plies
}

impl ChessRules for ShakmatyRules {
    fn validate_move(&self, position: &str, san: &str) -> Result<ValidatedMove, RulesError> {
        let pos = parse_position(position)?;

        let normalized = normalize_san(san);
        let parsed: San = normalized
            .parse()
            .map_err(|_| RulesError::InvalidNotation(san.to_string()))?;

        let mv = parsed.to_move(&pos).map_err(|_| RulesError::IllegalMove {
            san: san.to_string(),
            position: position.to_string(),
        })?;

        let canonical = San::from_move(&pos, mv.clone()).to_string();
        let mut next = pos;
        next.play_unchecked(mv);

        Ok(ValidatedMove {
            san: canonical,
            position: fen_of(&next),
        })
    }

    fn find_connecting_moves(
        &self,
        from: &str,
        to: &str,
        max_depth: usize,
    ) -> Option<Vec<ValidatedMove>> {
        let start = parse_position(from).ok()?;
        let target = placement_key(to).to_string();
        if placement_key(from) == target {
            return Some(Vec::new());
        }

        // Each ply removes at most one piece and never adds one.
        let target_pieces = piece_count(&target);
        if !can_reach(piece_count(from), target_pieces, max_depth) {
            return None;
        }

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(normalize_fen(&fen_of(&start)));

        let mut frontier: VecDeque<(Chess, Vec<ValidatedMove>)> = VecDeque::new();
        frontier.push_back((start, Vec::new()));

        while let Some((pos, line)) = frontier.pop_front() {
            if line.len() >= max_depth {
                continue;
            }

            for mv in pos.legal_moves() {
                let san = San::from_move(&pos, mv.clone()).to_string();
                let mut next = pos.clone();
                next.play_unchecked(mv);

                let fen = fen_of(&next);
                if !seen.insert(normalize_fen(&fen)) {
                    continue;
                }

                let mut extended = line.clone();
                extended.push(ValidatedMove {
                    san,
                    position: fen.clone(),
                });

                if placement_key(&fen) == target {
                    trace!(plies = extended.len(), searched = seen.len(), "Connected positions");
                    return Some(extended);
                }

                let remaining = max_depth - extended.len();
                if can_reach(piece_count(&fen), target_pieces, remaining) {
                    frontier.push_back((next, extended));
                }
            }
        }

        trace!(searched = seen.len(), max_depth, "No connecting line");
        None
    }

    fn canonical_position(&self, position: &str) -> Result<String, RulesError> {
        parse_position(position).map(|pos| fen_of(&pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(moves: &[&str]) -> String {
        let rules = ShakmatyRules::new();
        let mut fen = STARTING_FEN.to_string();
        for mv in moves {
            fen = rules.validate_move(&fen, mv).unwrap().position;
        }
        fen
    }

    #[test]
    fn test_validate_move_canonicalizes() {
        let rules = ShakmatyRules::new();
        let mv = rules.validate_move(STARTING_FEN, "Ngf3").unwrap();
        assert_eq!(mv.san, "Nf3");

        let mv = rules.validate_move(STARTING_FEN, "e4!").unwrap();
        assert_eq!(mv.san, "e4");
        assert_eq!(
            mv.position,
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
    }

    #[test]
    fn test_validate_move_rejects() {
        let rules = ShakmatyRules::new();
        assert!(matches!(
            rules.validate_move(STARTING_FEN, "e5"),
            Err(RulesError::IllegalMove { .. })
        ));
        assert!(matches!(
            rules.validate_move(STARTING_FEN, "hello"),
            Err(RulesError::InvalidNotation(_))
        ));
        assert!(matches!(
            rules.validate_move("not a fen", "e4"),
            Err(RulesError::InvalidPosition(_))
        ));
    }

    #[test]
    fn test_castling_with_zeros() {
        let fen = play(&["e4", "e5", "Nf3", "Nc6", "Bc4", "Bc5"]);
        let rules = ShakmatyRules::new();
        let mv = rules.validate_move(&fen, "0-0").unwrap();
        assert_eq!(mv.san, "O-O");
    }

    #[test]
    fn test_find_connecting_single_move() {
        let rules = ShakmatyRules::new();
        let target = play(&["d4"]);
        let line = rules
            .find_connecting_moves(STARTING_FEN, placement_key(&target), 3)
            .unwrap();
        assert_eq!(line.len(), 1);
        assert_eq!(line[0].san, "d4");
    }

    #[test]
    fn test_find_connecting_skipped_plies() {
        let rules = ShakmatyRules::new();
        let target = play(&["e4", "c5"]);
        let line = rules.find_connecting_moves(STARTING_FEN, &target, 3).unwrap();
        let sans: Vec<&str> = line.iter().map(|m| m.san.as_str()).collect();
        assert_eq!(sans, vec!["e4", "c5"]);
    }

    #[test]
    fn test_find_connecting_identical_and_unreachable() {
        let rules = ShakmatyRules::new();
        assert_eq!(
            rules.find_connecting_moves(STARTING_FEN, STARTING_FEN, 3),
            Some(Vec::new())
        );
        assert_eq!(
            rules.find_connecting_moves(STARTING_FEN, "8/8/8/4k3/8/8/8/4K3 w - - 0 1", 3),
            None
        );
    }

    #[test]
    fn test_canonical_position_pads_fields() {
        let rules = ShakmatyRules::new();
        let full = rules
            .canonical_position("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR")
            .unwrap();
        assert_eq!(full, STARTING_FEN);

        // Castling rights the placement contradicts are dropped
        let bare = rules.canonical_position("8/8/8/4k3/8/8/8/3K4").unwrap();
        assert_eq!(bare, "8/8/8/4k3/8/8/8/3K4 w - - 0 1");
    }
}
