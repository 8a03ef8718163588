//! Repertoire worker
//!
//! Manages opening repertoires stored on disk: edits trees, imports and
//! analyzes PGN games, and reconciles recognized video positions.

use std::path::PathBuf;

use anyhow::Context;
use chess_core::Side;
use clap::{Parser, Subcommand};
use repertoire::{NodeId, RepertoireId};
use tracing::info;

use repertoire_worker::commands::{self, Worker};
use repertoire_worker::config::WorkerConfig;

#[derive(Parser, Debug)]
#[command(name = "repertoire-worker")]
#[command(about = "Opening repertoire engine")]
#[command(version)]
struct Cli {
    /// Directory holding stored repertoires
    #[arg(long, global = true, env = "REPERTOIRE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Longest move sequence searched between two video samples
    #[arg(long, global = true, env = "RECONCILE_MAX_DEPTH")]
    max_depth: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty repertoire
    Create {
        name: String,
        #[arg(long, default_value = "white")]
        color: Side,
    },
    /// List stored repertoires
    List,
    /// Print a repertoire's move tree
    Show {
        id: RepertoireId,
        /// Full JSON export instead of the move listing
        #[arg(long)]
        json: bool,
    },
    /// Store a repertoire from a JSON export
    Restore { path: PathBuf },
    /// Delete a repertoire
    Remove { id: RepertoireId },
    /// Add one move below a node (the root by default)
    Add {
        id: RepertoireId,
        san: String,
        #[arg(long)]
        parent: Option<NodeId>,
    },
    /// Add a line of moves, reusing existing nodes
    AddLine {
        id: RepertoireId,
        #[arg(required = true)]
        moves: Vec<String>,
        #[arg(long)]
        from: Option<NodeId>,
    },
    /// Delete a node and everything below it
    DeleteNode { id: RepertoireId, node: NodeId },
    /// Copy a subtree into a new repertoire
    Extract {
        id: RepertoireId,
        node: NodeId,
        name: String,
    },
    /// Merge repertoires into a new one
    Merge {
        name: String,
        #[arg(required = true, num_args = 2..)]
        ids: Vec<RepertoireId>,
    },
    /// Set or clear a node comment
    Annotate {
        id: RepertoireId,
        node: NodeId,
        /// Omit to clear the comment
        comment: Option<String>,
    },
    /// Import the openings of every game in a PGN file
    ImportGame {
        id: RepertoireId,
        pgn: PathBuf,
        #[arg(long)]
        max_plies: Option<usize>,
    },
    /// Check games in a PGN file against a repertoire
    Analyze {
        id: RepertoireId,
        pgn: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Build a move tree from recognized video positions (JSON samples file)
    Reconcile {
        samples: PathBuf,
        /// Graft the result into this repertoire
        #[arg(long)]
        merge_into: Option<RepertoireId>,
        /// Node to graft at; defaults to the node matching the first sample
        #[arg(long, requires = "merge_into")]
        at: Option<NodeId>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = WorkerConfig::load()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(depth) = cli.max_depth {
        config.reconcile_max_depth = depth.max(1);
    }
    info!(data_dir = %config.data_dir.display(), "Worker config loaded");

    let worker = Worker::new(config).context("Failed to open repertoire store")?;
    let service = worker.service();

    match cli.command {
        Command::Create { name, color } => {
            let tree = worker.create(&name, color).await?;
            if let Some(id) = tree.id {
                println!("Created repertoire {id} ({name}, {color})");
            }
        }
        Command::List => print!("{}", worker.list().await?),
        Command::Show { id, json } => println!("{}", worker.show(id, json).await?),
        Command::Restore { path } => {
            let id = worker.restore(&path).await?;
            println!("Restored as repertoire {id}");
        }
        Command::Remove { id } => {
            service.delete(id).await?;
            println!("Deleted repertoire {id}");
        }
        Command::Add { id, san, parent } => {
            let parent = match parent {
                Some(node) => node,
                None => service.get(id).await?.root_id(),
            };
            let node = service.add_node(id, parent, &san).await?;
            println!("Added node {node}");
        }
        Command::AddLine { id, moves, from } => {
            let from = match from {
                Some(node) => node,
                None => service.get(id).await?.root_id(),
            };
            let path = service.add_line(id, from, &moves).await?;
            let ids: Vec<String> = path.iter().map(ToString::to_string).collect();
            println!("Line ends at node {}", ids.join(" -> "));
        }
        Command::DeleteNode { id, node } => {
            let metadata = service.delete_node(id, node).await?;
            println!(
                "Deleted; {} nodes remain, depth {}",
                metadata.total_nodes, metadata.deepest_depth
            );
        }
        Command::Extract { id, node, name } => {
            let tree = service.extract(id, node, &name).await?;
            if let Some(new_id) = tree.id {
                println!("Extracted {} nodes into repertoire {new_id}", tree.len());
            }
        }
        Command::Merge { name, ids } => {
            let tree = service.merge(&ids, &name).await?;
            if let Some(new_id) = tree.id {
                println!("Merged into repertoire {new_id} ({} nodes)", tree.len());
            }
        }
        Command::Annotate { id, node, comment } => {
            service.set_comment(id, node, comment).await?;
            println!("Updated comment on node {node}");
        }
        Command::ImportGame { id, pgn, max_plies } => {
            let summary = worker.import_pgn(id, &pgn, max_plies).await?;
            println!(
                "Imported {} games ({} skipped), {} new nodes",
                summary.games, summary.skipped, summary.nodes_added
            );
        }
        Command::Analyze { id, pgn, json } => {
            let analyses = worker.analyze_pgn(id, &pgn).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&analyses)?);
            } else {
                for analysis in &analyses {
                    println!("{}", commands::render_analysis(analysis));
                }
            }
        }
        Command::Reconcile {
            samples,
            merge_into,
            at,
        } => {
            let samples = commands::read_samples(&samples)
                .with_context(|| format!("Failed to read samples from {}", samples.display()))?;
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let run = worker.reconcile(samples, merge_into, at, shutdown).await?;
            print!("{}", commands::render_reconcile(&run));
        }
    }

    Ok(())
}
