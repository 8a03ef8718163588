//! Builds a move-tree fragment from a time-ordered sequence of positions
//! recognized in video frames.
//!
//! The recognizer is noisy: it repeats positions, skips plies, and misreads
//! frames. Each sample is connected to the current cursor through a short
//! legal move search; samples that cannot be connected are reported as
//! unlinked gaps instead of failing the run.

use chess_core::position::{has_side_to_move, is_valid_placement, placement_key, same_placement};
use chess_core::{ChessRules, Side, ValidatedMove};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RepertoireError;
use crate::progress::ProgressEvent;
use crate::tree::{Node, NodeArena, NodeId, PreOrder, Repertoire, TreeMetadata};

pub const DEFAULT_MAX_SEARCH_DEPTH: usize = 3;
pub const DEFAULT_MAX_RESYNC_CANDIDATES: usize = 8;

/// One recognized position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    #[serde(alias = "fen")]
    pub position: String,
    pub frame_index: u64,
    pub timestamp_seconds: f64,
}

impl PositionSample {
    pub fn new(position: impl Into<String>, frame_index: u64, timestamp_seconds: f64) -> Self {
        Self {
            position: position.into(),
            frame_index,
            timestamp_seconds,
        }
    }
}

/// Two samples that could not be connected by legal moves within the search bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlinkedGap {
    /// Sample the cursor was last synchronized on
    pub from: PositionSample,
    pub to: PositionSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Longest move sequence searched between two samples
    pub max_search_depth: usize,
    /// Ancestors of the cursor tried as branch points when the cursor itself does not connect
    pub max_resync_candidates: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_search_depth: DEFAULT_MAX_SEARCH_DEPTH,
            max_resync_candidates: DEFAULT_MAX_RESYNC_CANDIDATES,
        }
    }
}

/// A detached move tree rooted at the first usable sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    arena: NodeArena,
}

impl Fragment {
    fn new(root_position: String) -> Self {
        Self {
            arena: NodeArena::new(root_position),
        }
    }

    pub fn root(&self) -> &Node {
        self.arena
            .get(self.arena.root_id())
            .unwrap_or_else(|| unreachable!("fragment without root"))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
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

    pub fn line_to(&self, id: NodeId) -> Option<Vec<String>> {
        self.arena.line_to(id)
    }

    pub fn iter(&self) -> PreOrder<'_> {
        self.arena.preorder()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn metadata(&self) -> TreeMetadata {
        self.arena.compute_metadata()
    }

    /// Turn the fragment into an unsaved repertoire, e.g. to merge it with others.
    pub fn into_repertoire(self, name: impl Into<String>, color: Side) -> Repertoire {
        Repertoire::from_arena(name, color, self.arena)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    pub fragment: Fragment,
    pub gaps: Vec<UnlinkedGap>,
    /// Samples attached to the fragment (the root sample included)
    pub samples_linked: usize,
    /// Samples whose position could not be parsed
    pub samples_rejected: usize,
    /// Samples repeating the cursor's position
    pub duplicates_skipped: usize,
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Completed(Reconciliation),
    /// Stopped between samples; holds what was built so far.
    Cancelled(Reconciliation),
}

impl ReconcileOutcome {
    pub fn reconciliation(&self) -> &Reconciliation {
        match self {
            ReconcileOutcome::Completed(r) | ReconcileOutcome::Cancelled(r) => r,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReconcileOutcome::Cancelled(_))
    }
}

struct Reconciler<'a> {
    rules: &'a dyn ChessRules,
    options: &'a ReconcileOptions,
    fragment: Fragment,
    cursor: NodeId,
    cursor_sample: PositionSample,
    gaps: Vec<UnlinkedGap>,
    linked: usize,
    rejected: usize,
    duplicates: usize,
}

impl<'a> Reconciler<'a> {
    fn new(
        rules: &'a dyn ChessRules,
        options: &'a ReconcileOptions,
        first: &PositionSample,
        root_position: String,
    ) -> Self {
        let fragment = Fragment::new(root_position);
        let cursor = fragment.arena.root_id();
        Self {
            rules,
            options,
            fragment,
            cursor,
            cursor_sample: first.clone(),
            gaps: Vec::new(),
            linked: 1,
            rejected: 0,
            duplicates: 0,
        }
    }

    fn position_of(&self, id: NodeId) -> String {
        self.fragment
            .arena
            .get(id)
            .map(|n| n.position.clone())
            .unwrap_or_default()
    }

    fn step(&mut self, sample: &PositionSample) {
        if !is_valid_placement(&sample.position) {
            warn!(frame = sample.frame_index, position = %sample.position, "Rejected unreadable sample");
            self.rejected += 1;
            return;
        }

        let cursor_position = self.position_of(self.cursor);
        if same_placement(&cursor_position, &sample.position) {
            self.duplicates += 1;
            self.cursor_sample = sample.clone();
            return;
        }

        if let Some(line) = self.rules.find_connecting_moves(
            &cursor_position,
            &sample.position,
            self.options.max_search_depth,
        ) {
            self.extend(self.cursor, &line);
            self.synchronized(sample);
            return;
        }

        if self.resynchronize(sample) {
            self.synchronized(sample);
            return;
        }

        warn!(
            from_frame = self.cursor_sample.frame_index,
            to_frame = sample.frame_index,
            "No legal line between samples, recording gap"
        );
        self.gaps.push(UnlinkedGap {
            from: self.cursor_sample.clone(),
            to: sample.clone(),
        });
    }

    fn synchronized(&mut self, sample: &PositionSample) {
        self.linked += 1;
        self.cursor_sample = sample.clone();
    }

    /// New-branch attempt when the cursor does not connect: jump to a node that
    /// already holds the sample's placement, or branch from a nearby ancestor.
    fn resynchronize(&mut self, sample: &PositionSample) -> bool {
        let rewind = self
            .fragment
            .arena
            .nodes_newest_first()
            .find(|n| same_placement(&n.position, &sample.position))
            .map(|n| n.id);
        if let Some(id) = rewind {
            debug!(node = %id, frame = sample.frame_index, "Rewound to earlier position");
            self.cursor = id;
            return true;
        }

        let mut ancestors = Vec::new();
        let mut current = self.fragment.arena.get(self.cursor).and_then(|n| n.parent);
        while let Some(id) = current {
            if ancestors.len() >= self.options.max_resync_candidates {
                break;
            }
            ancestors.push(id);
            current = self.fragment.arena.get(id).and_then(|n| n.parent);
        }

        for ancestor in ancestors {
            let from = self.position_of(ancestor);
            if let Some(line) = self.rules.find_connecting_moves(
                &from,
                &sample.position,
                self.options.max_search_depth,
            ) {
                debug!(node = %ancestor, plies = line.len(), "Branched from ancestor");
                self.extend(ancestor, &line);
                return true;
            }
        }
        false
    }

    /// Walk `line` from `from`, reusing children with the same move.
    fn extend(&mut self, from: NodeId, line: &[ValidatedMove]) {
        let mut at = from;
        for mv in line {
            at = match self.fragment.arena.child_by_move(at, &mv.san) {
                Some(existing) => existing.id,
                None => self
                    .fragment
                    .arena
                    .push_child(at, mv.san.clone(), mv.position.clone()),
            };
        }
        self.cursor = at;
    }

    fn finish(self) -> Reconciliation {
        Reconciliation {
            fragment: self.fragment,
            gaps: self.gaps,
            samples_linked: self.linked,
            samples_rejected: self.rejected,
            duplicates_skipped: self.duplicates,
        }
    }
}

/// A placement-only first sample does not say who moves. Try both sides and
/// keep the one whose search reaches the next distinct sample by the shortest
/// line; `None` when neither connects.
fn infer_root_side(
    rules: &dyn ChessRules,
    options: &ReconcileOptions,
    root_position: &str,
    rest: &[PositionSample],
) -> Option<String> {
    let next = rest.iter().find(|s| {
        is_valid_placement(&s.position) && !same_placement(root_position, &s.position)
    })?;
    let placement = placement_key(root_position);

    let mut best: Option<(usize, String)> = None;
    for side in ["w", "b"] {
        let Ok(candidate) = rules.canonical_position(&format!("{placement} {side}")) else {
            continue;
        };
        let Some(line) =
            rules.find_connecting_moves(&candidate, &next.position, options.max_search_depth)
        else {
            continue;
        };
        if best.as_ref().map_or(true, |(plies, _)| line.len() < *plies) {
            best = Some((line.len(), candidate));
        }
    }

    let (plies, position) = best?;
    debug!(plies, position = %position, frame = next.frame_index, "Inferred side to move");
    Some(position)
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

/// Reconcile `samples` into a fragment.
///
/// Cancellation is checked between samples. Progress is reported once per
/// sample through `on_progress`. Fails only when there is no usable sample.
pub fn reconcile(
    rules: &dyn ChessRules,
    samples: &[PositionSample],
    options: &ReconcileOptions,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(ProgressEvent),
) -> Result<ReconcileOutcome, RepertoireError> {
    if samples.is_empty() {
        return Err(RepertoireError::InvalidInputSequence("no position samples"));
    }
    let total = samples.len();

    let mut rejected = 0;
    let mut first = None;
    for (i, sample) in samples.iter().enumerate() {
        match rules.canonical_position(&sample.position) {
            Ok(position) => {
                first = Some((i, sample, position));
                break;
            }
            Err(e) => {
                warn!(frame = sample.frame_index, error = %e, "Skipping unreadable leading sample");
                rejected += 1;
            }
        }
    }
    let Some((start, first_sample, root_position)) = first else {
        return Err(RepertoireError::InvalidInputSequence("no usable position samples"));
    };

    let root_position = if has_side_to_move(&first_sample.position) {
        root_position
    } else {
        infer_root_side(rules, options, &root_position, &samples[start + 1..])
            .unwrap_or(root_position)
    };

    let mut state = Reconciler::new(rules, options, first_sample, root_position);
    state.rejected = rejected;
    on_progress(ProgressEvent::running(
        percent(start + 1, total),
        format!("Processed {} of {total} samples", start + 1),
    ));

    for (i, sample) in samples.iter().enumerate().skip(start + 1) {
        if cancel.is_cancelled() {
            info!(processed = i, total, "Reconciliation cancelled");
            return Ok(ReconcileOutcome::Cancelled(state.finish()));
        }

        state.step(sample);
        on_progress(ProgressEvent::running(
            percent(i + 1, total),
            format!("Processed {} of {total} samples", i + 1),
        ));
    }

    let result = state.finish();
    info!(
        nodes = result.fragment.len(),
        gaps = result.gaps.len(),
        linked = result.samples_linked,
        duplicates = result.duplicates_skipped,
        "Reconciliation complete"
    );
    Ok(ReconcileOutcome::Completed(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_core::position::placement_key;
    use chess_core::{ShakmatyRules, STARTING_FEN};

    fn play(moves: &[&str]) -> String {
        let rules = ShakmatyRules::new();
        let mut fen = STARTING_FEN.to_string();
        for mv in moves {
            fen = rules.validate_move(&fen, mv).unwrap().position;
        }
        fen
    }

    fn samples(positions: &[String]) -> Vec<PositionSample> {
        positions
            .iter()
            .enumerate()
            .map(|(i, p)| PositionSample::new(p.clone(), i as u64 * 30, i as f64))
            .collect()
    }

    fn run(positions: &[String]) -> Reconciliation {
        let rules = ShakmatyRules::new();
        let outcome = reconcile(
            &rules,
            &samples(positions),
            &ReconcileOptions::default(),
            &CancellationToken::new(),
            |_| {},
        )
        .unwrap();
        match outcome {
            ReconcileOutcome::Completed(r) => r,
            ReconcileOutcome::Cancelled(_) => panic!("unexpected cancel"),
        }
    }

    #[test]
    fn test_duplicates_are_no_ops() {
        let start = STARTING_FEN.to_string();
        let e4 = play(&["e4"]);
        let result = run(&[start.clone(), start, e4.clone(), placement_key(&e4).to_string()]);
        assert_eq!(result.fragment.len(), 2);
        assert_eq!(result.duplicates_skipped, 2);
        assert!(result.gaps.is_empty());
    }

    #[test]
    fn test_placement_only_start_with_black_to_move() {
        let e4 = play(&["e4"]);
        let c5 = play(&["e4", "c5"]);
        let result = run(&[
            placement_key(&e4).to_string(),
            placement_key(&c5).to_string(),
        ]);
        let fragment = &result.fragment;
        let root = fragment.root();
        assert_eq!(root.side_to_move(), Side::Black);
        assert_eq!(root.position, e4);

        let moves: Vec<&str> = fragment.children(root.id).iter().filter_map(|n| n.mv.as_deref()).collect();
        assert_eq!(moves, vec!["c5"]);
        assert_eq!(fragment.len(), 2);
        assert!(result.gaps.is_empty());
    }

    #[test]
    fn test_placement_only_start_prefers_shortest_line() {
        let e4 = play(&["e4"]);
        let result = run(&[
            placement_key(STARTING_FEN).to_string(),
            placement_key(&e4).to_string(),
        ]);
        let root = result.fragment.root();
        assert_eq!(root.position, STARTING_FEN);
        assert!(result.fragment.child_by_move(root.id, "e4").is_some());
        assert_eq!(result.fragment.len(), 2);
    }

    #[test]
    fn test_skipped_plies_create_intermediate_nodes() {
        let result = run(&[STARTING_FEN.to_string(), play(&["e4", "c5"])]);
        let root = result.fragment.root();
        let e4 = result.fragment.child_by_move(root.id, "e4").unwrap();
        let c5 = result.fragment.child_by_move(e4.id, "c5").unwrap();
        assert_eq!(c5.ply, 2);
        assert_eq!(result.fragment.metadata().deepest_depth, 2);
    }

    #[test]
    fn test_rewind_branches_from_shared_node() {
        let result = run(&[
            STARTING_FEN.to_string(),
            play(&["e4"]),
            play(&["e4", "e5"]),
            STARTING_FEN.to_string(),
            play(&["d4"]),
            play(&["e4"]),
            play(&["e4", "c5"]),
        ]);
        let fragment = &result.fragment;
        let root = fragment.root();
        let moves: Vec<&str> = fragment.children(root.id).iter().filter_map(|n| n.mv.as_deref()).collect();
        assert_eq!(moves, vec!["e4", "d4"]);

        let e4 = fragment.child_by_move(root.id, "e4").unwrap();
        let replies: Vec<&str> = fragment.children(e4.id).iter().filter_map(|n| n.mv.as_deref()).collect();
        assert_eq!(replies, vec!["e5", "c5"]);
        assert!(result.gaps.is_empty());
        assert_eq!(fragment.len(), 5);
    }

    #[test]
    fn test_gap_keeps_cursor_and_recovers() {
        let garbage = "8/8/8/4k3/8/8/8/4K3".to_string();
        let result = run(&[
            STARTING_FEN.to_string(),
            garbage.clone(),
            play(&["e4"]),
        ]);
        assert_eq!(result.gaps.len(), 1);
        assert_eq!(result.gaps[0].from.position, STARTING_FEN);
        assert_eq!(result.gaps[0].to.position, garbage);
        // The next good sample still connects from the unmoved cursor
        assert!(result.fragment.child_by_move(result.fragment.root().id, "e4").is_some());
    }

    #[test]
    fn test_unreadable_samples_are_rejected() {
        let result = run(&[
            "garbage".to_string(),
            STARTING_FEN.to_string(),
            "rnbqkbnr/ppp".to_string(),
            play(&["Nf3"]),
        ]);
        assert_eq!(result.samples_rejected, 2);
        assert_eq!(result.fragment.root().position, STARTING_FEN);
        assert_eq!(result.fragment.len(), 2);
    }

    #[test]
    fn test_empty_and_unusable_inputs_fail() {
        let rules = ShakmatyRules::new();
        let token = CancellationToken::new();
        let options = ReconcileOptions::default();
        assert!(matches!(
            reconcile(&rules, &[], &options, &token, |_| {}),
            Err(RepertoireError::InvalidInputSequence(_))
        ));
        assert!(matches!(
            reconcile(&rules, &samples(&["nope".to_string()]), &options, &token, |_| {}),
            Err(RepertoireError::InvalidInputSequence(_))
        ));
    }

    #[test]
    fn test_cancel_stops_between_samples() {
        let rules = ShakmatyRules::new();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = reconcile(
            &rules,
            &samples(&[STARTING_FEN.to_string(), play(&["e4"])]),
            &ReconcileOptions::default(),
            &token,
            |_| {},
        )
        .unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.reconciliation().fragment.len(), 1);
    }

    #[test]
    fn test_progress_reaches_one_hundred() {
        let rules = ShakmatyRules::new();
        let mut events = Vec::new();
        reconcile(
            &rules,
            &samples(&[STARTING_FEN.to_string(), play(&["e4"]), play(&["e4", "e5"])]),
            &ReconcileOptions::default(),
            &CancellationToken::new(),
            |e| events.push(e),
        )
        .unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events.last().unwrap().percent_complete, 100);
    }
}
