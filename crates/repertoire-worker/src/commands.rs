//! Command implementations behind the CLI.
//!
//! Every command goes through `RepertoireService`, so writes to one repertoire
//! are serialized even when several run at once.

use std::fmt::Write as _;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chess_core::pgn::parse_games;
use chess_core::{ChessRules, ParsedGame, ShakmatyRules, Side};
use futures::StreamExt;
use repertoire::{
    analyze_games, import_game, FileStore, GameReport, Node, NodeId, PlyClassification,
    PositionSample, ReconcileOutcome, Repertoire, RepertoireError, RepertoireId,
    RepertoireService, TaskId, TaskRunner,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;

pub struct Worker {
    config: WorkerConfig,
    service: RepertoireService<FileStore>,
    runner: TaskRunner,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub games: usize,
    pub skipped: usize,
    pub nodes_added: usize,
}

#[derive(Debug, Serialize)]
pub struct GameAnalysis {
    pub white: String,
    pub black: String,
    pub white_elo: Option<i32>,
    pub black_elo: Option<i32>,
    pub result: String,
    pub report: Option<GameReport>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct ReconcileRun {
    pub task_id: TaskId,
    pub outcome: ReconcileOutcome,
    /// Target repertoire and number of nodes grafted into it
    pub grafted: Option<(RepertoireId, usize)>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Result<Self, WorkerError> {
        let rules: Arc<dyn ChessRules> = Arc::new(ShakmatyRules::new());
        let store = FileStore::open(&config.data_dir, config.max_repertoires)?;
        let runner = TaskRunner::new(rules.clone(), config.max_concurrent_tasks);
        Ok(Self {
            service: RepertoireService::new(store, rules),
            runner,
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn service(&self) -> &RepertoireService<FileStore> {
        &self.service
    }

    pub async fn create(&self, name: &str, color: Side) -> Result<Repertoire, WorkerError> {
        Ok(self.service.create(name, color).await?)
    }

    pub async fn list(&self) -> Result<String, WorkerError> {
        let summaries = self.service.list().await?;
        if summaries.is_empty() {
            return Ok("No repertoires".to_string());
        }
        let mut out = String::new();
        for s in summaries {
            let _ = writeln!(
                out,
                "{:>4}  {:<30} {:<5}  {} nodes, depth {}",
                s.id.to_string(),
                s.name,
                s.color,
                s.metadata.total_nodes,
                s.metadata.deepest_depth
            );
        }
        Ok(out)
    }

    pub async fn show(&self, id: RepertoireId, json: bool) -> Result<String, WorkerError> {
        if json {
            return Ok(self.service.store().export_json(id)?);
        }
        let tree = self.service.get(id).await?;
        Ok(render_tree(&tree))
    }

    /// Store a repertoire from a JSON export as a new entry.
    pub async fn restore(&self, path: &Path) -> Result<RepertoireId, WorkerError> {
        let json = std::fs::read_to_string(path)?;
        Ok(self.service.store().import_json(&json)?)
    }

    pub async fn import_pgn(
        &self,
        id: RepertoireId,
        path: &Path,
        max_plies: Option<usize>,
    ) -> Result<ImportSummary, WorkerError> {
        let games = read_games(path)?;
        let max_plies = max_plies.unwrap_or(self.config.import_max_plies);

        let summary = self
            .service
            .mutate(id, |tree, rules| {
                let before = tree.metadata().total_nodes;
                let mut skipped = 0;
                for (i, game) in games.iter().enumerate() {
                    if let Err(e) = import_game(tree, rules, &game.plies, max_plies) {
                        warn!(game = i + 1, error = %e, "Skipping game");
                        skipped += 1;
                    }
                }
                Ok(ImportSummary {
                    games: games.len(),
                    skipped,
                    nodes_added: tree.metadata().total_nodes - before,
                })
            })
            .await?;

        info!(id = %id, games = summary.games, added = summary.nodes_added, "Imported games");
        Ok(summary)
    }

    pub async fn analyze_pgn(
        &self,
        id: RepertoireId,
        path: &Path,
    ) -> Result<Vec<GameAnalysis>, WorkerError> {
        let tree = self.service.get(id).await?;
        let games = read_games(path)?;

        Ok(analyze_games(&tree, &games)
            .into_iter()
            .map(|(game, result)| {
                let (report, error) = match result {
                    Ok(report) => (Some(report), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                GameAnalysis {
                    white: game.metadata.white.clone(),
                    black: game.metadata.black.clone(),
                    white_elo: game.metadata.white_elo,
                    black_elo: game.metadata.black_elo,
                    result: game.metadata.result.clone(),
                    report,
                    error,
                }
            })
            .collect())
    }

    /// Run a reconciliation in the background, logging its progress. When
    /// `shutdown` resolves first the task is cancelled and its partial result
    /// returned. With `graft_into`, the fragment is merged into that
    /// repertoire at `at` or, by default, at the node matching the fragment's
    /// first position.
    pub async fn reconcile<F>(
        &self,
        samples: Vec<PositionSample>,
        graft_into: Option<RepertoireId>,
        at: Option<NodeId>,
        shutdown: F,
    ) -> Result<ReconcileRun, WorkerError>
    where
        F: Future<Output = ()>,
    {
        let task = self
            .runner
            .spawn_reconciliation(samples, self.config.reconcile_options());
        let task_id = task.id();
        let cancel = task.cancellation_token();

        let watcher = self.runner.subscribe(task_id).map(|subscription| {
            tokio::spawn(async move {
                let events = subscription.into_stream();
                futures::pin_mut!(events);
                while let Some(event) = events.next().await {
                    info!(
                        task_id = %task_id,
                        status = ?event.status,
                        percent = event.percent_complete,
                        "{}",
                        event.message
                    );
                }
            })
        });

        let join = task.join();
        tokio::pin!(join);
        tokio::pin!(shutdown);
        let outcome = tokio::select! {
            result = &mut join => result?,
            _ = &mut shutdown => {
                warn!(task_id = %task_id, "Shutdown requested, cancelling reconciliation");
                cancel.cancel();
                join.await?
            }
        };
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }

        let grafted = match graft_into {
            Some(target) => {
                let fragment = &outcome.reconciliation().fragment;
                let parent = match at {
                    Some(node) => node,
                    None => self.locate_anchor(target, &fragment.root().position).await?,
                };
                let added = self.service.graft(target, parent, fragment).await?;
                Some((target, added))
            }
            None => None,
        };

        Ok(ReconcileRun {
            task_id,
            outcome,
            grafted,
        })
    }

    async fn locate_anchor(
        &self,
        id: RepertoireId,
        position: &str,
    ) -> Result<NodeId, WorkerError> {
        let tree = self.service.get(id).await?;
        tree.find_by_position(position)
            .into_iter()
            .min_by_key(|n| n.ply)
            .map(|n| n.id)
            .ok_or_else(|| {
                RepertoireError::PositionMismatch {
                    expected: "a node with the fragment's first position".to_string(),
                    found: position.to_string(),
                }
                .into()
            })
    }
}

fn read_games(path: &Path) -> Result<Vec<ParsedGame>, WorkerError> {
    let raw = std::fs::read_to_string(path)?;
    let games = parse_games(&raw);
    if games.is_empty() {
        return Err(WorkerError::NoGames(path.display().to_string()));
    }
    Ok(games)
}

/// Samples file: a JSON array of `{position|fen, frame_index, timestamp_seconds}`.
pub fn read_samples(path: &Path) -> Result<Vec<PositionSample>, WorkerError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Indented move listing, one node per line.
pub fn render_tree(tree: &Repertoire) -> String {
    let root = tree.root();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({}) - {} nodes, {} moves, depth {}",
        tree.name,
        tree.color,
        tree.metadata().total_nodes,
        tree.metadata().total_moves,
        tree.metadata().deepest_depth
    );

    for node in tree.iter() {
        let depth = (node.ply - root.ply) as usize;
        let label = match &node.mv {
            Some(mv) => move_label(node, mv),
            None => "(start)".to_string(),
        };
        let _ = write!(out, "{}{} [{}]", "  ".repeat(depth), label, node.id);
        if let Some(comment) = &node.comment {
            let _ = write!(out, " {{{comment}}}");
        }
        out.push('\n');
    }
    out
}

/// Numbered from the position's fullmove counter, so trees rooted
/// mid-game keep their real move numbers.
fn move_label(node: &Node, san: &str) -> String {
    let mover = node.side_to_move().opposite();
    let fullmove = node
        .position
        .split_whitespace()
        .nth(5)
        .and_then(|field| field.parse::<u32>().ok());
    let number = match (fullmove, mover) {
        (Some(n), Side::White) => n,
        (Some(n), Side::Black) => n.saturating_sub(1),
        (None, _) => node.ply.div_ceil(2),
    }
    .max(1);
    match mover {
        Side::White => format!("{number}. {san}"),
        Side::Black => format!("{number}... {san}"),
    }
}

fn player_label(name: &str, elo: Option<i32>) -> String {
    match elo {
        Some(elo) => format!("{name} ({elo})"),
        None => name.to_string(),
    }
}

pub fn render_analysis(analysis: &GameAnalysis) -> String {
    let header = format!(
        "{} vs {} ({})",
        player_label(&analysis.white, analysis.white_elo),
        player_label(&analysis.black, analysis.black_elo),
        analysis.result
    );
    let Some(report) = &analysis.report else {
        let error = analysis.error.as_deref().unwrap_or("no result");
        return format!("{header}: {error}");
    };

    let verdict = match (report.divergence_ply, report.divergence()) {
        (Some(ply), Some(PlyClassification::OutOfRepertoire { expected_move })) => {
            match expected_move {
                Some(expected) => format!("left the repertoire at ply {}, expected {expected}", ply + 1),
                None => format!("left the repertoire at ply {}", ply + 1),
            }
        }
        (Some(ply), _) => format!("opponent left the repertoire at ply {}", ply + 1),
        _ => "stayed in the repertoire".to_string(),
    };
    format!(
        "{header}: {verdict} ({} in, {} out, {} opponent new)",
        report.in_repertoire, report.out_of_repertoire, report.opponent_new
    )
}

pub fn render_reconcile(run: &ReconcileRun) -> String {
    let r = run.outcome.reconciliation();
    let mut out = String::new();
    let state = if run.outcome.is_cancelled() { "cancelled" } else { "completed" };
    let _ = writeln!(
        out,
        "Task {} {state}: {} nodes, {} samples linked, {} duplicates, {} rejected, {} gaps",
        run.task_id,
        r.fragment.len(),
        r.samples_linked,
        r.duplicates_skipped,
        r.samples_rejected,
        r.gaps.len()
    );
    for gap in &r.gaps {
        let _ = writeln!(
            out,
            "  gap: frame {} ({:.1}s) -> frame {} ({:.1}s)",
            gap.from.frame_index,
            gap.from.timestamp_seconds,
            gap.to.frame_index,
            gap.to.timestamp_seconds
        );
    }
    if let Some((id, added)) = run.grafted {
        let _ = writeln!(out, "Grafted {added} new nodes into repertoire {id}");
    }
    out
}
