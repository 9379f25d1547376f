//! `planwise` - plan-driven index and statistics advice
//!
//! ```bash
//! # Advice from a saved EXPLAIN (FORMAT JSON) capture
//! planwise analyze --engine pg --plan plan.json \
//!     --sql "SELECT * FROM orders WHERE customer_id = 42"
//!
//! # Indexes that were never scanned
//! planwise unused-indexes --url postgres://app@localhost/shop
//!
//! # Trial the first recommendation against a live database, then revert it
//! planwise validate --url postgres://app@localhost/shop --finding 1 \
//!     --sql "SELECT * FROM orders WHERE customer_id = 42"
//! ```

mod commands;
mod config;
mod logging;
mod render;

use clap::{Parser, Subcommand, ValueEnum};
use commands::Format;
use config::PlanwiseConfig;
use logging::LoggingConfig;
use planwise_core::EngineKind;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "planwise")]
#[command(about = "Explains why a query plan is slow and which index or statistics change would help")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML file with [advisor] and [harness] tables
    #[arg(short, long, global = true, env = "PLANWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Debug-level logging for planwise crates
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a query against captured EXPLAIN output
    Analyze {
        /// The query the plan was captured for
        #[arg(short, long)]
        sql: String,

        #[arg(short, long, value_enum)]
        engine: EngineArg,

        /// EXPLAIN output file (JSON or text), `-` for stdin
        #[arg(short, long)]
        plan: PathBuf,

        /// Index usage snapshot as a JSON array
        #[arg(short, long)]
        usage: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// List indexes with no recorded scans on a live database
    UnusedIndexes {
        #[arg(long, env = "PLANWISE_DATABASE_URL")]
        url: String,

        /// Also print the full usage snapshot
        #[arg(long)]
        all: bool,

        #[arg(short, long, value_enum, default_value = "table")]
        format: Format,
    },

    /// Apply one recommendation, measure the query and revert the change
    Validate {
        /// The query to measure
        #[arg(short, long)]
        sql: String,

        #[arg(long, env = "PLANWISE_DATABASE_URL")]
        url: String,

        /// Finding number as listed by `analyze`
        #[arg(short = 'n', long, default_value_t = 1)]
        finding: usize,

        #[arg(short, long, value_enum, default_value = "table")]
        format: Format,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EngineArg {
    #[value(alias = "pg", alias = "postgres")]
    Postgresql,
    Mysql,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Postgresql => EngineKind::Postgresql,
            EngineArg::Mysql => EngineKind::Mysql,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&LoggingConfig::new(cli.verbose, cli.log_json)) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = PlanwiseConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            sql,
            engine,
            plan,
            usage,
            format,
        } => commands::analyze(&config, engine.into(), &sql, &plan, usage.as_deref(), format),
        Commands::UnusedIndexes { url, all, format } => {
            commands::unused_indexes(&config, &url, all, format).await
        }
        Commands::Validate {
            sql,
            url,
            finding,
            format,
        } => commands::validate(&config, &url, &sql, finding, format).await,
    }
}
