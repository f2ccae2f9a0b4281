#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use rankwise::{
    load_config_from_path, EngineConfig, ItemId, LineDecisionSource, MergeEngine, RunOutcome,
    SessionKeeper, SqliteBlobStore, StoredSession, TiePolicy,
};

#[derive(Parser)]
#[command(name = "rankwise", version, about = "Rank a list by answering pairwise questions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask questions until the list is ranked (or you pause with `p`)
    Rank {
        /// List identifier; one stored session per list
        #[arg(long)]
        list: String,
        /// Items file: JSON array of strings, or one id per line
        #[arg(long)]
        items: PathBuf,
        /// SQLite store path (default: $RANKWISE_STORE_PATH or .rankwise.sqlite)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Engine config (.toml or .json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Append one JSONL record per answer to this file
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Discard the stored session and every learned answer first
        #[arg(long)]
        fresh: bool,
        /// Which item goes first when you answer "equal"
        #[arg(long, value_enum)]
        tie: Option<CliTiePolicy>,
        /// Never infer answers from chains of earlier answers
        #[arg(long)]
        no_closure: bool,
    },
    /// Print progress for a list as JSON
    Status {
        #[arg(long)]
        list: String,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the final ranking, one id per line
    Result {
        #[arg(long)]
        list: String,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Restart a list's ranking, keeping learned answers unless --forget
    Reset {
        #[arg(long)]
        list: String,
        #[arg(long)]
        items: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        forget: bool,
    },
    /// List stored sessions
    Lists {
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliTiePolicy {
    LeftFirst,
    RightFirst,
}

impl From<CliTiePolicy> for TiePolicy {
    fn from(p: CliTiePolicy) -> Self {
        match p {
            CliTiePolicy::LeftFirst => TiePolicy::LeftFirst,
            CliTiePolicy::RightFirst => TiePolicy::RightFirst,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rank {
            list,
            items,
            db,
            config,
            trace,
            fresh,
            tie,
            no_closure,
        } => {
            let mut engine_config = match config {
                Some(path) => load_config_from_path(path)?,
                None => EngineConfig::default(),
            };
            if let Some(tie) = tie {
                engine_config.tie_policy = tie.into();
            }
            if no_closure {
                engine_config.closure_after_commit = false;
            }

            let items = read_items(&items)?;
            let store = open_store(db)?;
            let _lock = store.lock_exclusive()?;

            let mut keeper = SessionKeeper::new(store, MergeEngine::new(engine_config));
            if let Some(path) = trace {
                keeper = keeper.with_jsonl_trace(path)?;
            }

            let mut state = if fresh {
                keeper.reset(&list, &items, false).await?
            } else {
                keeper.resume_or_start(&list, &items).await?
            };

            let source = LineDecisionSource::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
            match keeper.run(&list, &mut state, &source).await? {
                RunOutcome::Completed(order) => {
                    println!("\nRanking for {list}:");
                    for (idx, id) in order.iter().enumerate() {
                        println!("{:>3}. {id}", idx + 1);
                    }
                }
                RunOutcome::Paused(progress) => {
                    println!(
                        "\npaused after {} answers (~{}% done); run again to resume",
                        progress.asked, progress.percentage
                    );
                }
            }
            keeper.shutdown()?;
        }
        Commands::Status { list, db } => {
            let keeper = SessionKeeper::new(open_store(db)?, MergeEngine::default());
            let status = match keeper.load(&list).await? {
                StoredSession::Missing => return Err(format!("no session stored for list {list:?}").into()),
                StoredSession::Malformed { error, .. } => {
                    return Err(format!("stored session for {list:?} is unusable: {error}").into())
                }
                StoredSession::Valid(state) => serde_json::json!({
                    "list_id": list,
                    "complete": state.is_complete(),
                    "items": state.item_count(),
                    "known_pairs": state.cache.len(),
                    "progress": keeper.engine().progress(&state),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Result { list, db } => {
            let keeper = SessionKeeper::new(open_store(db)?, MergeEngine::default());
            let state = match keeper.load(&list).await? {
                StoredSession::Valid(state) => state,
                StoredSession::Missing => return Err(format!("no session stored for list {list:?}").into()),
                StoredSession::Malformed { error, .. } => {
                    return Err(format!("stored session for {list:?} is unusable: {error}").into())
                }
            };
            if !state.is_complete() {
                let progress = keeper.engine().progress(&state);
                return Err(format!(
                    "ranking for {list:?} is not complete (~{}% done)",
                    progress.percentage
                )
                .into());
            }
            for id in keeper.engine().finalize(&state) {
                println!("{id}");
            }
        }
        Commands::Reset {
            list,
            items,
            db,
            forget,
        } => {
            let items = read_items(&items)?;
            let store = open_store(db)?;
            let _lock = store.lock_exclusive()?;
            let keeper = SessionKeeper::new(store, MergeEngine::default());
            let state = keeper.reset(&list, &items, !forget).await?;
            println!(
                "reset {list}: {} items, {} known pairs",
                state.item_count(),
                state.cache.len()
            );
        }
        Commands::Lists { db } => {
            let keeper = SessionKeeper::new(open_store(db)?, MergeEngine::default());
            for id in keeper.list_ids().await? {
                println!("{id}");
            }
        }
    }

    Ok(())
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteBlobStore, Box<dyn std::error::Error>> {
    let path = db.unwrap_or_else(SqliteBlobStore::default_path);
    Ok(SqliteBlobStore::new(path)?)
}

/// JSON array of strings, or one id per non-empty line (`#` starts a comment).
fn read_items(path: &Path) -> Result<Vec<ItemId>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    if raw.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&raw)?);
    }
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
