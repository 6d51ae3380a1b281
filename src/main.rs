//! repoctx CLI - sync remote repositories into a local index and query it under token budgets

mod commands;

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "repoctx")]
#[command(version)]
#[command(about = "Repository context index - incremental GitHub sync and token-budgeted code queries")]
#[command(long_about = r#"
repoctx keeps a local index of a GitHub repository's files and declared
symbols, and serves slices of it sized for an LLM context window:
  • Full and webhook-driven incremental sync
  • Symbol context with referenced types and callee signatures
  • File, line-range, function, batch, outline and symbol search queries

Example usage:
  repoctx init
  repoctx sync octo/widgets
  repoctx context octo/widgets src/app.py handle_request --budget 4000
  repoctx file octo/widgets src/app.py --start 10 --end 80
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file
    #[arg(short, long, global = true, default_value = "repoctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the database
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Run a full sync of one repository, or of every tracked repository
    Sync {
        /// Repository as owner/name
        #[arg(required_unless_present = "all")]
        repo: Option<String>,

        /// Re-index every file even when the revision is unchanged
        #[arg(short, long)]
        force: bool,

        /// Sync every tracked repository
        #[arg(long, conflicts_with = "repo")]
        all: bool,
    },

    /// Apply a push-event payload (JSON file, or - for stdin) as a partial sync
    Webhook {
        payload: PathBuf,
    },

    /// Sweep every tracked repository on a fixed interval until interrupted
    Cron {
        /// Seconds between sweeps
        #[arg(long, default_value = "3600")]
        interval: u64,
    },

    /// Show the sync status of a repository
    Status {
        repo: String,
    },

    /// List tracked repositories
    Repos,

    /// List the indexed files of a repository
    Files {
        repo: String,
    },

    /// A symbol with the types it references and the functions it calls
    Context {
        repo: String,
        path: String,
        name: String,

        /// Token budget (defaults to budget.context_budget)
        #[arg(short, long)]
        budget: Option<usize>,
    },

    /// A whole file, a line range, or one function
    File {
        repo: String,
        path: String,

        /// Return only this function
        #[arg(short, long, conflicts_with_all = ["start", "end"])]
        function: Option<String>,

        /// First line (1-indexed)
        #[arg(long, requires = "end")]
        start: Option<usize>,

        /// Last line (inclusive)
        #[arg(long, requires = "start")]
        end: Option<usize>,

        /// Token cap (defaults to budget.default_max_tokens)
        #[arg(short, long)]
        max_tokens: Option<usize>,
    },

    /// Several file slices under one budget, read from a JSON array
    Batch {
        repo: String,

        /// JSON file of [{"path", "startLine"?, "endLine"?}], or - for stdin
        requests: PathBuf,

        #[arg(short, long)]
        max_tokens: Option<usize>,
    },

    /// Nested symbol outline of a file
    Outline {
        repo: String,
        path: String,
    },

    /// Symbols whose name contains QUERY, ignoring case
    Search {
        repo: String,
        query: String,

        /// Only symbols of this kind (function, method, class, struct, interface, type, enum)
        #[arg(short, long)]
        kind: Option<String>,

        #[arg(short, long, default_value_t = repoctx::query::DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },

    /// Files changed since a revision (defaults to the last synced one)
    Diff {
        repo: String,

        #[arg(short, long)]
        since: Option<String>,

        /// Branch to compare (defaults to github.branch)
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Show statistics about the index
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(self) -> bool {
        self == OutputMode::Human
    }
}

/// Print `{"ok": true, "command", "data"}` on stdout.
pub fn emit_success(mode: OutputMode, command: &str, data: impl Serialize) -> anyhow::Result<()> {
    debug_assert_eq!(mode, OutputMode::Json);
    let envelope = serde_json::json!({
        "ok": true,
        "command": command,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mode = if cli.json { OutputMode::Json } else { OutputMode::Human };
    let result = commands::run(cli.command, &cli.config, mode).await;

    if let Err(e) = &result {
        if mode.is_human() {
            repoctx::ui::error(&format!("{:#}", e));
            std::process::exit(1);
        }
        let envelope = serde_json::json!({ "ok": false, "error": format!("{:#}", e) });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        std::process::exit(1);
    }
    Ok(())
}
