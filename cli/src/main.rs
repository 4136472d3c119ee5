//! SessionGraph command line entry point
//!
//! Offline tools over JSON files (`detect`, `merge`, `score`) and maintenance
//! commands against a RocksDB graph directory (`refresh`, `history`, `stats`).
//! Results are printed to stdout as JSON; logs go to stderr.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sessiongraph_memory::{Clock, MemoryConfig, SessionGraph, SystemClock, Timestamp};

#[derive(Parser)]
#[command(name = "sessiongraph")]
#[command(about = "Temporal knowledge-graph memory for coding-agent sessions")]
#[command(version)]
struct Args {
    /// JSON configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect communities in an adjacency JSON file
    Detect {
        graph: PathBuf,
        /// Overrides the configured seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Merge detected communities into existing ones
    Merge {
        existing: PathBuf,
        detected: PathBuf,
        /// Overrides the configured merge threshold
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Decay-score a JSON array of memories
    Score {
        items: PathBuf,
        /// Evaluation time in epoch milliseconds; now when omitted
        #[arg(long)]
        now: Option<i64>,
        /// Minimum score to keep; the configured search floor when omitted
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Recompute the communities of a project
    Refresh {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    /// Print every version of a node, newest first
    History {
        #[arg(long)]
        db: PathBuf,
        #[arg(long, value_enum)]
        kind: commands::Kind,
        id: String,
    },
    /// Active row counts for a project
    Stats {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        project: String,
    },
}

fn open(db: &Path, config: MemoryConfig) -> Result<SessionGraph> {
    tracing::info!("Opening graph at {}", db.display());
    Ok(SessionGraph::open(db, config)?)
}

async fn run(args: Args) -> Result<serde_json::Value> {
    let config = MemoryConfig::load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Detect { graph, seed } => {
            let mut options = config.detection.clone();
            if let Some(seed) = seed {
                options = options.with_seed(seed);
            }
            commands::detect(&graph, &options)
        }
        Command::Merge {
            existing,
            detected,
            threshold,
        } => commands::merge(
            &existing,
            &detected,
            threshold.unwrap_or(config.merge_threshold),
        ),
        Command::Score {
            items,
            now,
            threshold,
        } => {
            let now = now.map(Timestamp).unwrap_or_else(|| SystemClock::new().now());
            commands::score(
                &items,
                now,
                threshold.unwrap_or(config.search.min_decay_score),
            )
        }
        Command::Refresh {
            db,
            project,
            reason,
        } => {
            let graph = open(&db, config)?;
            commands::refresh(&graph, &project, &reason).await
        }
        Command::History { db, kind, id } => {
            let graph = open(&db, config)?;
            commands::history(&graph, kind, &id).await
        }
        Command::Stats { db, project } => {
            let graph = open(&db, config)?;
            Ok(serde_json::to_value(graph.stats(&project).await?)?)
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sessiongraph=info,sessiongraph_memory=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(args).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                tracing::error!("Failed to render output: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
