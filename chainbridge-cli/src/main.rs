//! # chainbridge CLI
//!
//! Drives a bridge over the in-process engine: create a chain from a spec
//! file, send it JSON-RPC requests and print what comes back.

mod commands;

use anyhow::{Context, Result};
use chainbridge_core::{logging, BridgeConfig};
use chainbridge_types::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chainbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bridge configuration file (YAML)
    #[arg(long, env = "CHAINBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Engine log level: error, warn, info, debug or trace
    #[arg(long, env = "CHAINBRIDGE_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a chain, send requests and print the responses
    Run {
        /// Chain specification file
        #[arg(long)]
        spec: PathBuf,

        /// Database snapshot from a previous run
        #[arg(long)]
        database: Option<PathBuf>,

        /// JSON-RPC request to send (repeatable)
        #[arg(long = "request", short = 'r')]
        requests: Vec<String>,

        /// Create the chain with JSON-RPC disabled
        #[arg(long)]
        disable_json_rpc: bool,

        /// Maximum number of queued JSON-RPC requests
        #[arg(long)]
        max_pending: Option<u32>,

        /// How long to wait for each response, in milliseconds
        #[arg(long, default_value_t = 2000)]
        wait_ms: u64,
    },

    /// Check that a chain specification initializes
    Check {
        /// Chain specification file
        #[arg(long)]
        spec: PathBuf,
    },
}

fn init_tracing(verbose: bool, level: LogLevel) -> Result<()> {
    let level = if verbose { LogLevel::Debug.max(level) } else { level };
    let default = logging::level_filter(level).to_string();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config = config.with_log_level(level);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(cli.verbose, config.log_level)?;

    match cli.command {
        Commands::Run {
            spec,
            database,
            requests,
            disable_json_rpc,
            max_pending,
            wait_ms,
        } => {
            let opts = commands::RunOptions {
                database,
                requests,
                disable_json_rpc,
                max_pending,
                wait_ms,
            };
            commands::run_chain(config, &spec, opts).await
        }
        Commands::Check { spec } => commands::check_chain(config, &spec).await,
    }
}
