//! RustedBridge CLI — the main entry point.
//!
//! Commands:
//! - `ask`      — Answer one question through the orchestration loop
//! - `catalog`  — Discover and print every worker's tools
//! - `call`     — Run one tool call against one worker
//! - `status`   — Show configured workers and their container state
//! - `serve`    — Expose the agent as a JSON-RPC worker on stdio
//! - `config`   — Print the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rustedbridge_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "rustedbridge",
    about = "RustedBridge — answer questions by orchestrating JSON-RPC tool workers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file to use instead of ~/.rustedbridge/config.toml
    #[arg(short, long, global = true, env = "RUSTEDBRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question using the configured workers
    Ask {
        /// The question
        question: String,

        /// Override the iteration budget
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Discover and print the worker catalog
    Catalog {
        /// Print the selector schemas as JSON
        #[arg(long)]
        json: bool,
    },

    /// Call one tool on one worker
    Call {
        /// Worker name (e.g. CBS)
        worker: String,

        /// Tool name (e.g. get_statistics)
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Show worker status
    Status,

    /// Serve the agent as a JSON-RPC worker on stdin/stdout
    Serve,

    /// Print the effective configuration
    Config {
        /// Print the config file path only
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    let config = AppConfig::load_with_overrides(&config_path)
        .map_err(|e| format!("Failed to load config: {e}"))?;

    // Initialize tracing. Logs go to stderr so `serve` keeps stdout for replies.
    let filter = if cli.verbose { "debug" } else { config.log_level.as_str() };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Ask {
            question,
            max_iterations,
        } => commands::ask::run(&config, &question, max_iterations).await?,
        Commands::Catalog { json } => commands::catalog::run(&config, json).await?,
        Commands::Call { worker, tool, args } => commands::call::run(&config, &worker, &tool, &args).await?,
        Commands::Status => commands::status::run(&config).await?,
        Commands::Serve => commands::serve::run(&config).await?,
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path(&config_path)?
            } else {
                commands::config_cmd::show(&config)?
            }
        }
    }

    Ok(())
}
