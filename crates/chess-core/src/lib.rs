//! Chess primitives shared by the repertoire crates: move legality via
//! shakmaty, position keys, and PGN game parsing.

pub mod game_data;
pub mod pgn;
pub mod position;
pub mod rules;

pub use game_data::{GameMetadata, ParsedGame, Ply, Side};
pub use position::STARTING_FEN;
pub use rules::{ChessRules, RulesError, ShakmatyRules, ValidatedMove};
