#![allow(dead_code)]

use chess_core::{ChessRules, Ply, ShakmatyRules, Side, STARTING_FEN};
use repertoire::{add_line, PositionSample, Repertoire};

/// Kings only; no line from the starting position reaches it in a few plies.
pub const UNREACHABLE: &str = "8/8/8/4k3/8/8/8/4K3 w - - 0 1";

pub fn rules() -> ShakmatyRules {
    ShakmatyRules::new()
}

/// Full FEN after playing `moves` from the start.
pub fn position_after(moves: &[&str]) -> String {
    let rules = rules();
    moves.iter().fold(STARTING_FEN.to_string(), |fen, mv| {
        rules
            .validate_move(&fen, mv)
            .unwrap_or_else(|e| panic!("bad test line at {mv}: {e}"))
            .position
    })
}

/// Repertoire built from whole lines starting at the root.
pub fn repertoire(name: &str, color: Side, lines: &[&[&str]]) -> Repertoire {
    let rules = rules();
    let mut tree = Repertoire::new(name, color);
    let root = tree.root_id();
    for line in lines {
        add_line(&mut tree, &rules, root, line).unwrap();
    }
    tree
}

/// Plies alternating from white.
pub fn plies(moves: &[&str]) -> Vec<Ply> {
    moves
        .iter()
        .enumerate()
        .map(|(i, san)| Ply::new(*san, Side::for_ply(i as u32)))
        .collect()
}

/// One sample per position, 30 frames (one second) apart.
pub fn samples(positions: &[&str]) -> Vec<PositionSample> {
    positions
        .iter()
        .enumerate()
        .map(|(i, p)| PositionSample::new(*p, i as u64 * 30, i as f64))
        .collect()
}
