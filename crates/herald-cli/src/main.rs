use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod simulate;

use config::HeraldConfig;

#[derive(Parser)]
#[command(name = "herald")]
#[command(version)]
#[command(about = "herald — symbolic addressing between a master, its workers and agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,

    /// Run the configured script against an in-process cluster
    Simulate {
        /// Override how long to wait for messages to settle, in milliseconds
        #[arg(long)]
        settle_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Simulate { settle_ms } => cmd_simulate(&cli.config, settle_ms).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        info!("Created default config at {}", config_path.display());
    }

    println!("herald initialized at {}", config_dir.display());
    println!("Edit {} to shape the simulated cluster.", config_path.display());
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let config = HeraldConfig::load(config_path)?;
    println!("{:#?}", config);
    Ok(())
}

async fn cmd_simulate(config_path: &Option<PathBuf>, settle_ms: Option<u64>) -> Result<()> {
    let config = HeraldConfig::load(config_path)?;
    let settle = Duration::from_millis(settle_ms.unwrap_or(config.runtime.settle_ms));
    info!(
        "Simulating {} workers, agents {:?}, {} script steps",
        config.cluster.workers,
        config.cluster.agents,
        config.script.len()
    );
    simulate::run(&config, settle).await
}
