use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A player color. Repertoires are owned by one side; plies record who moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// Side to move at a given ply, counting from a white-to-move root.
    pub fn for_ply(ply: u32) -> Self {
        if ply % 2 == 0 {
            Side::White
        } else {
            Side::Black
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "white" | "w" => Ok(Side::White),
            "black" | "b" => Ok(Side::Black),
            other => Err(format!("Color must be 'white' or 'black', got '{other}'")),
        }
    }
}

impl From<shakmaty::Color> for Side {
    fn from(color: shakmaty::Color) -> Self {
        match color {
            shakmaty::Color::White => Side::White,
            shakmaty::Color::Black => Side::Black,
        }
    }
}

impl From<Side> for shakmaty::Color {
    fn from(side: Side) -> Self {
        match side {
            Side::White => shakmaty::Color::White,
            Side::Black => shakmaty::Color::Black,
        }
    }
}

/// One half-move of a parsed game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ply {
    pub san: String, // normalized SAN, no check/annotation suffix
    pub mover: Side,
}

impl Ply {
    pub fn new(san: impl Into<String>, mover: Side) -> Self {
        Self {
            san: san.into(),
            mover,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameMetadata {
    pub white: String,
    pub black: String,
    pub result: String, // "1-0", "0-1", "1/2-1/2", "*"
    pub date: Option<String>,
    pub event: Option<String>,
    pub site: Option<String>,
    pub eco: Option<String>,
    pub white_elo: Option<i32>,
    pub black_elo: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedGame {
    pub metadata: GameMetadata,
    pub plies: Vec<Ply>,
}

impl ParsedGame {
    /// SAN strings only, in order.
    pub fn moves(&self) -> Vec<&str> {
        self.plies.iter().map(|p| p.san.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parity() {
        assert_eq!(Side::for_ply(0), Side::White);
        assert_eq!(Side::for_ply(1), Side::Black);
        assert_eq!(Side::for_ply(14), Side::White);
    }

    #[test]
    fn test_side_from_str() {
        assert_eq!("White".parse::<Side>().unwrap(), Side::White);
        assert_eq!("b".parse::<Side>().unwrap(), Side::Black);
        assert!("green".parse::<Side>().is_err());
    }
}
