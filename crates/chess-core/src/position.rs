//! Position strings and the keys used to compare them.
//!
//! Repertoire nodes store full FENs. Frame recognizers usually only see the
//! piece placement, so reconciliation compares positions by placement alone.

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Strips move counters from FEN, keeping only position + side + castling + ep.
pub fn normalize_fen(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

/// Piece placement field of a FEN (first field).
pub fn placement_key(fen: &str) -> &str {
    fen.split_whitespace().next().unwrap_or("")
}

/// True when the FEN carries a side-to-move field after the placement.
pub fn has_side_to_move(fen: &str) -> bool {
    fen.split_whitespace().nth(1).is_some()
}

/// True when both positions have the same piece placement.
pub fn same_placement(a: &str, b: &str) -> bool {
    placement_key(a) == placement_key(b)
}

/// Number of pieces on the board described by a placement field.
pub fn piece_count(fen: &str) -> usize {
    placement_key(fen)
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .count()
}

/// Checks that a placement field has 8 ranks of 8 squares with known piece letters.
pub fn is_valid_placement(fen: &str) -> bool {
    let placement = placement_key(fen);
    let ranks: Vec<&str> = placement.split('/').collect();
    if ranks.len() != 8 {
        return false;
    }

    ranks.iter().all(|rank| {
        let mut squares = 0u32;
        for c in rank.chars() {
            match c {
                '1'..='8' => squares += c.to_digit(10).unwrap_or(0),
                'p' | 'n' | 'b' | 'r' | 'q' | 'k' | 'P' | 'N' | 'B' | 'R' | 'Q' | 'K' => squares += 1,
                _ => return false,
            }
        }
        squares == 8
    })
}

/// Pads a partial FEN with defaults for the missing trailing fields.
/// Castling defaults to `KQkq`; rights that the placement contradicts are
/// dropped when the position is built.
pub fn complete_fen(fen: &str) -> String {
    const DEFAULTS: [&str; 6] = ["", "w", "KQkq", "-", "0", "1"];

    let mut fields: Vec<&str> = fen.split_whitespace().collect();
    for default in DEFAULTS.iter().skip(fields.len()) {
        fields.push(default);
    }
    fields.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fen() {
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
        let normalized = normalize_fen(fen);
        assert_eq!(normalized, "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3");
    }

    #[test]
    fn test_placement_key_and_counts() {
        assert_eq!(placement_key(STARTING_FEN), "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR");
        assert_eq!(piece_count(STARTING_FEN), 32);
        assert!(same_placement(
            STARTING_FEN,
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR b - - 5 9"
        ));
    }

    #[test]
    fn test_has_side_to_move() {
        assert!(has_side_to_move(STARTING_FEN));
        assert!(has_side_to_move("8/8/8/4k3/8/8/8/4K3 b"));
        assert!(!has_side_to_move("8/8/8/4k3/8/8/8/4K3"));
        assert!(!has_side_to_move("  "));
    }

    #[test]
    fn test_is_valid_placement() {
        assert!(is_valid_placement(STARTING_FEN));
        assert!(is_valid_placement("8/8/8/4k3/8/8/8/4K3"));
        assert!(!is_valid_placement("8/8/8/4k3/8/8/8"));
        assert!(!is_valid_placement("8/8/8/4k4/8/8/8/4K3"));
        assert!(!is_valid_placement("8/8/8/4x3/8/8/8/4K3"));
        assert!(!is_valid_placement(""));
    }

    #[test]
    fn test_complete_fen() {
        assert_eq!(
            complete_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR"),
            STARTING_FEN
        );
        assert_eq!(complete_fen("8/8/8/4k3/8/8/8/4K3 b"), "8/8/8/4k3/8/8/8/4K3 b KQkq - 0 1");
        assert_eq!(complete_fen(STARTING_FEN), STARTING_FEN);
    }
}
