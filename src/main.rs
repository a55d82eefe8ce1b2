//! catalog-ingest CLI

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use catalog_ingest::state::AppState;
use catalog_ingest::validation::Policy;
use catalog_ingest::{serve, Config};

#[derive(Parser)]
#[command(name = "catalog-ingest")]
#[command(about = "Validate product catalogs in chunks and track job progress", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (default if no command specified)
    Serve,

    /// Classify one CSV file and write valid/rejected reports
    Process {
        /// CSV file to process
        file: PathBuf,

        /// Reject every row with an error
        #[arg(long)]
        strict: bool,

        /// Do not repair fixable errors
        #[arg(long)]
        no_auto_fix: bool,
    },

    /// Validate configuration
    ValidateConfig,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve) => serve_command(&cli.config),
        Some(Commands::Process {
            file,
            strict,
            no_auto_fix,
        }) => process_command(&cli.config, &file, Policy::new(!no_auto_fix, strict)),
        Some(Commands::ValidateConfig) => validate_command(&cli.config),
        Some(Commands::GenerateConfig { output }) => generate_config_command(&output),
    }
}

/// Loads the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        Config::from_file(path)?
    } else {
        tracing::warn!("Config file {} not found, using defaults", path.display());
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

fn serve_command(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                signal.cancel();
            }
        });

        serve(config, shutdown).await
    })
}

fn process_command(config_path: &Path, file: &Path, policy: Policy) -> Result<()> {
    let config = load_config(config_path)?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let state = AppState::build(&config).await?;
        let taxonomy = state.taxonomy_snapshot().await;
        let report = state.batch.process_file(file, policy, taxonomy).await?;

        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    })
}

fn validate_command(config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path)?;
    config.validate()?;

    println!("Configuration is valid");
    println!("  Bind: {}", config.server.bind);
    println!("  Storage: {:?}", config.storage.backend);
    println!("  Chunk size: {} rows", config.processing.chunk_size);
    println!("  Classify threads: {}", config.processing.classify_threads);
    println!("  Dispatch: {:?} (concurrency {})", config.dispatch.mode, config.dispatch.concurrency);
    if let Some(url) = &config.dispatch.worker_url {
        println!("  Worker URL: {}", url);
    }

    Ok(())
}

fn generate_config_command(output: &Path) -> Result<()> {
    let yaml = Config::default().to_yaml()?;
    std::fs::write(output, yaml)?;
    println!("Wrote sample configuration to {}", output.display());
    Ok(())
}
