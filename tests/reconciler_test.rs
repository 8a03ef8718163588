//! Video position reconciliation scenarios.

mod common;

use chess_core::STARTING_FEN;
use common::{position_after, rules, samples, UNREACHABLE};
use repertoire::{reconcile, ReconcileOptions, RepertoireError};
use tokio_util::sync::CancellationToken;

#[test]
fn test_simple_connect() {
    let p1 = position_after(&["d4"]);
    let outcome = reconcile(
        &rules(),
        &samples(&[STARTING_FEN, &p1]),
        &ReconcileOptions::default(),
        &CancellationToken::new(),
        |_| {},
    )
    .unwrap();

    let result = outcome.reconciliation();
    let fragment = &result.fragment;
    assert_eq!(fragment.root().position, STARTING_FEN);
    let children = fragment.children(fragment.root().id);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].mv.as_deref(), Some("d4"));
    assert_eq!(children[0].position, p1);
    assert!(result.gaps.is_empty());
}

#[test]
fn test_unconnectable_pair_is_a_gap_not_an_error() {
    let outcome = reconcile(
        &rules(),
        &samples(&[STARTING_FEN, UNREACHABLE]),
        &ReconcileOptions::default(),
        &CancellationToken::new(),
        |_| {},
    )
    .unwrap();

    let result = outcome.reconciliation();
    assert_eq!(result.fragment.len(), 1);
    assert_eq!(result.gaps.len(), 1);
    assert_eq!(result.gaps[0].from.position, STARTING_FEN);
    assert_eq!(result.gaps[0].to.position, UNREACHABLE);
}

#[test]
fn test_noisy_sequence() {
    // Repeats, a skipped ply, a misread frame, then the game continues
    let e4 = position_after(&["e4"]);
    let c5_nf3 = position_after(&["e4", "c5", "Nf3"]);
    let d6 = position_after(&["e4", "c5", "Nf3", "d6"]);
    let input = samples(&[STARTING_FEN, STARTING_FEN, &e4, &e4, &c5_nf3, UNREACHABLE, &d6]);

    let outcome = reconcile(
        &rules(),
        &input,
        &ReconcileOptions::default(),
        &CancellationToken::new(),
        |_| {},
    )
    .unwrap();
    let result = outcome.reconciliation();

    assert_eq!(result.duplicates_skipped, 2);
    assert_eq!(result.gaps.len(), 1);
    let deepest = result.fragment.iter().max_by_key(|n| n.ply).unwrap();
    assert_eq!(
        result.fragment.line_to(deepest.id).unwrap(),
        vec!["e4", "c5", "Nf3", "d6"]
    );
    assert_eq!(result.fragment.len(), 5);
}

#[test]
fn test_transposition_is_kept_as_separate_paths() {
    let a = position_after(&["Nf3"]);
    let ab = position_after(&["Nf3", "Nf6"]);
    let abc = position_after(&["Nf3", "Nf6", "d4"]);
    let c = position_after(&["d4"]);
    let cb = position_after(&["d4", "Nf6"]);
    let same = position_after(&["d4", "Nf6", "Nf3"]);

    // Two video segments reaching the same position by different orders
    let input = samples(&[STARTING_FEN, &a, &ab, &abc, STARTING_FEN, &c, &cb, &same]);
    let outcome = reconcile(
        &rules(),
        &input,
        &ReconcileOptions::default(),
        &CancellationToken::new(),
        |_| {},
    )
    .unwrap();
    let fragment = &outcome.reconciliation().fragment;

    let holders = fragment
        .iter()
        .filter(|n| chess_core::position::same_placement(&n.position, &same))
        .count();
    assert_eq!(holders, 2);
    assert_eq!(fragment.children(fragment.root().id).len(), 2);
}

#[test]
fn test_no_usable_samples() {
    for input in [Vec::new(), samples(&["garbage", "more garbage"])] {
        assert!(matches!(
            reconcile(
                &rules(),
                &input,
                &ReconcileOptions::default(),
                &CancellationToken::new(),
                |_| {},
            ),
            Err(RepertoireError::InvalidInputSequence(_))
        ));
    }
}
