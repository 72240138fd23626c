//! # Commit Harness CLI (`chx`)
//!
//! ## Usage
//!
//! ```bash
//! chx --config ./config/chx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chx init` | Create the store and run schema migrations |
//! | `chx ingest` | Embed commits from the configured branch |
//! | `chx ingest-logs` | Chunk CI logs by stage and embed them |
//! | `chx search [--corpus logs] "<query>"` | Print the nearest entries |
//! | `chx ask [--corpus logs] ["<question>"]` | Answer one question, or every configured one |
//! | `chx stats` | Per-collection summary of the store |
//! | `chx completions <shell>` | Print shell completions |
//!
//! Results go to stdout; logs and warnings go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use commit_harness::ingest::{IngestArgs, LogIngestArgs};
use commit_harness_core::corpus::Corpus;
use commit_harness::{ask, config, ingest, logging, sqlite_store, stats};

#[derive(Parser)]
#[command(
    name = "chx",
    about = "Commit Harness — embed git history and ask an LLM about it",
    version,
    long_about = "Commit Harness reads commits from a git repository, embeds their messages \
    into a local SQLite vector store, and answers questions by retrieving the most relevant \
    commits and passing them to an Ollama model."
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/chx.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which collection `search` and `ask` read from.
#[derive(Clone, Copy, ValueEnum)]
enum CorpusArg {
    Commits,
    Logs,
}

impl From<CorpusArg> for Corpus {
    fn from(arg: CorpusArg) -> Self {
        match arg {
            CorpusArg::Commits => Corpus::Commits,
            CorpusArg::Logs => Corpus::Logs,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and run schema migrations.
    Init,

    /// Extract commits and embed them into the store.
    Ingest {
        /// Repository to read instead of `repository.git_repo_dir`.
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Branch to read instead of `repository.branch`.
        #[arg(long)]
        branch: Option<String>,

        /// Number of commits instead of `repository.no_of_commits`.
        #[arg(long)]
        max_count: Option<usize>,

        /// List the commits and ids that would be written, then stop.
        #[arg(long)]
        dry_run: bool,
    },

    /// Chunk CI logs by pipeline stage and embed them into the store.
    IngestLogs {
        /// Folder to read instead of `logs.log_folder`.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// List the chunks and ids that would be written, then stop.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the entries nearest to a query.
    Search {
        query: String,

        #[arg(long, value_enum, default_value_t = CorpusArg::Commits)]
        corpus: CorpusArg,

        /// Number of results (defaults to `retrieval.n_relevant_results`).
        #[arg(long)]
        limit: Option<usize>,

        /// Print hits as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question, or every question configured for the corpus.
    Ask {
        question: Option<String>,

        #[arg(long, value_enum, default_value_t = CorpusArg::Commits)]
        corpus: CorpusArg,
    },

    /// Summarise what's in the store.
    Stats,

    /// Print shell completions.
    Completions { shell: Shell },
}

/// Stop flag raised on the first Ctrl-C. Work already in flight finishes.
fn install_stop_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight records");
            flag.store(true, Ordering::SeqCst);
        }
    });
    stop
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "chx", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = sqlite_store::SqliteStore::open(&cfg).await?;
            store.close().await;
            println!("Store initialized at {}", cfg.store.db_path().display());
        }
        Commands::Ingest {
            repo,
            branch,
            max_count,
            dry_run,
        } => {
            let args = IngestArgs {
                repo,
                branch,
                max_count,
                dry_run,
            };
            let report = ingest::run_ingest(&cfg, &args, install_stop_flag()).await?;
            if !report.is_complete() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::IngestLogs { dir, dry_run } => {
            let args = LogIngestArgs { dir, dry_run };
            let report = ingest::run_ingest_logs(&cfg, &args, install_stop_flag()).await?;
            if !report.is_complete() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Search {
            query,
            corpus,
            limit,
            json,
        } => {
            ask::run_search(&cfg, corpus.into(), &query, limit, json).await?;
        }
        Commands::Ask { question, corpus } => {
            let summary = ask::run_ask(&cfg, corpus.into(), question, install_stop_flag()).await?;
            if summary.failed > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(ExitCode::SUCCESS)
}
