//! Lore Control - CLI for the evidence loop and the query router
//!
//! Results go to stdout as JSON; logs go to stderr.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lore_common::config::config_path;
use lore_common::LoreConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lorectl")]
#[command(about = "Lore - evidence loop and multi-source query router", long_about = None)]
#[command(version = lore_common::VERSION)]
struct Cli {
    /// Config file (default: $LORE_CONFIG or ~/.config/lore/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics to stderr when the command finishes
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the evidence loop once over a file of events (JSON array or JSONL)
    Run {
        #[arg(long)]
        events: PathBuf,

        /// Keep insights in memory instead of the graph database
        #[arg(long)]
        dry_run: bool,
    },

    /// Feed JSONL events from stdin through the background worker
    Loop {
        #[arg(long)]
        dry_run: bool,
    },

    /// Route a query to the configured sources
    Route {
        text: String,

        /// auto, all, or a source name (vector, fulltext, analytic)
        #[arg(long, default_value = "auto")]
        mode: String,
    },

    /// Add text files to the full-text index
    Index {
        #[arg(long = "file", required = true)]
        files: Vec<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config path
        #[arg(long)]
        save: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<LoreConfig> {
    let config = match path {
        Some(path) => {
            let mut config = LoreConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
        None => LoreConfig::load()?,
    };
    Ok(config)
}

fn init_logging(config: &LoreConfig) {
    let filter = std::env::var("LORE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| config.log.level.clone());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let config_file = cli.config.clone().unwrap_or_else(config_path);
    init_logging(&config);

    let metrics = lore_common::LoreMetrics::new()?;

    let result = match cli.command {
        Commands::Run { events, dry_run } => commands::run(&config, &metrics, &events, dry_run).await,
        Commands::Loop { dry_run } => commands::run_loop(&config, &metrics, dry_run).await,
        Commands::Route { text, mode } => commands::route(&config, &metrics, &text, &mode).await,
        Commands::Index { files } => commands::index(&config, &files),
        Commands::Config { save } => commands::config(&config, &config_file, save),
    };

    if cli.metrics {
        eprint!("{}", metrics.render());
    }
    result
}
