//! PGN parsing utilities: a lightweight regex-based parser.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::game_data::{GameMetadata, ParsedGame, Ply, Side};
use crate::position::STARTING_FEN;
use crate::rules::normalize_san;

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[(\w+)\s+"([^"]*)"\]"#).expect("header regex"));
static EVENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\[Event\s").expect("event regex"));
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("tag regex"));
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}|;[^\n]*").expect("comment regex"));
static VARIATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*\)").expect("variation regex"));
static NAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\d+").expect("nag regex"));
static MOVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"O-O-O|O-O|0-0-0|0-0|[KQRBN]?[a-h]?[1-8]?x?[a-h][1-8](?:=?[QRBN])?[+#]?",
    )
    .expect("move regex")
});

/// Parse every game in a PGN text (one or many games).
/// Games set up from a non-standard position, and games without moves, are skipped.
pub fn parse_games(raw: &str) -> Vec<ParsedGame> {
    let games: Vec<ParsedGame> = split_games(raw)
        .into_iter()
        .filter_map(parse_game)
        .collect();
    debug!(games = games.len(), "Parsed PGN");
    games
}

/// Parse a single game. Returns `None` for non-standard starts or empty movetext.
pub fn parse_game(pgn: &str) -> Option<ParsedGame> {
    let mut metadata = GameMetadata {
        white: "Unknown".to_string(),
        black: "Unknown".to_string(),
        result: "*".to_string(),
        white_elo: extract_header_int(pgn, "WhiteElo"),
        black_elo: extract_header_int(pgn, "BlackElo"),
        ..GameMetadata::default()
    };
    let mut setup = None;
    let mut fen = None;

    for cap in HEADER_RE.captures_iter(pgn) {
        let key = &cap[1];
        let value = cap[2].to_string();
        match key {
            "White" => metadata.white = value,
            "Black" => metadata.black = value,
            "Result" => metadata.result = value,
            "Date" => metadata.date = Some(value),
            "Event" => metadata.event = Some(value),
            "Site" => metadata.site = Some(value),
            "ECO" => metadata.eco = Some(value),
            "SetUp" => setup = Some(value),
            "FEN" => fen = Some(value),
            _ => {}
        }
    }

    // Filter non-standard positions
    if setup.as_deref() == Some("1") || fen.is_some() {
        if let Some(ref f) = fen {
            if f.trim() != STARTING_FEN {
                return None;
            }
        }
    }

    let moves = extract_moves(pgn);
    if moves.is_empty() {
        return None;
    }

    let plies = moves
        .into_iter()
        .enumerate()
        .map(|(i, san)| Ply::new(san, Side::for_ply(i as u32)))
        .collect();

    Some(ParsedGame { metadata, plies })
}

fn split_games(raw: &str) -> Vec<&str> {
    let starts: Vec<usize> = EVENT_RE.find_iter(raw).map(|m| m.start()).collect();
    if starts.is_empty() {
        return vec![raw];
    }

    let mut chunks = Vec::with_capacity(starts.len() + 1);
    let prefix = &raw[..starts[0]];
    if !prefix.trim().is_empty() {
        chunks.push(prefix);
    }
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(raw.len());
        chunks.push(&raw[start..end]);
    }
    chunks
}

/// Extract SAN moves from PGN text (after removing headers, comments, variations).
fn extract_moves(pgn: &str) -> Vec<String> {
    let no_headers = TAG_RE.replace_all(pgn, "");
    let no_comments = COMMENT_RE.replace_all(&no_headers, "");

    // Variations nest, so peel the innermost ones until none remain
    let mut text = no_comments.into_owned();
    while VARIATION_RE.is_match(&text) {
        text = VARIATION_RE.replace_all(&text, "").into_owned();
    }
    let text = NAG_RE.replace_all(&text, "");

    MOVE_RE
        .find_iter(&text)
        .map(|m| normalize_san(m.as_str()))
        .collect()
}

/// Integer value of a PGN header; `None` when absent or not a number.
fn extract_header_int(pgn: &str, header_name: &str) -> Option<i32> {
    let pattern = format!(r#"\[{}\s+"(\d+)"\]"#, regex::escape(header_name));
    let re = Regex::new(&pattern).ok()?;
    re.captures(pgn)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}
