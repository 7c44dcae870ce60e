//! mitm-relay - transparent TCP relay with traffic dumping
//!
//! Listens on a local address, forwards every accepted connection to a remote
//! address and logs the bytes flowing in both directions.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mitm_relay::{
    config::{ConfigManager, ReplaceRule},
    relay::ChunkFormat,
    shutdown, ConnectionManager, StartupError,
};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "mitm-relay")]
#[command(about = "Transparent TCP relay that logs and optionally rewrites traffic")]
#[command(version)]
#[command(long_about = "
Transparent TCP relay that logs and optionally rewrites traffic.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Configuration file
4. Built-in defaults

Environment variables:
  MITM_LISTEN_ADDR  - Local address to listen on (e.g., 0.0.0.0:3000)
  MITM_REMOTE_ADDR  - Target address to forward to
  MITM_LOG_FILE     - Output file path
  MITM_BUFFER_SIZE  - Maximum chunk size in bytes
")]
pub struct CliArgs {
    /// Local address
    #[arg(short = 'l', long = "local", help = "Local address to listen on [default: 0.0.0.0:3000]")]
    pub local: Option<String>,

    /// Remote address
    #[arg(short = 'r', long = "remote", help = "Remote address to forward to [default: 0.0.0.0:3000]")]
    pub remote: Option<String>,

    /// Log output file
    #[arg(long = "log", help = "Output file path [default: mitm.log]")]
    pub log_file: Option<PathBuf>,

    /// Optional configuration file
    #[arg(short, long, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Maximum chunk size in bytes")]
    pub buffer_size: Option<usize>,

    #[arg(long, value_enum, help = "How chunk contents are logged")]
    pub format: Option<ChunkFormat>,

    #[arg(long, help = "Do not log chunk contents")]
    pub no_dump: bool,

    /// May be given more than once
    #[arg(long = "replace", value_name = "FROM=TO", help = "Rewrite FROM to TO in every chunk")]
    pub replace: Vec<ReplaceRule>,

    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.validate_config {
        println!("Configuration is valid");
        println!("  Listen address: {}", config.relay.listen_addr);
        println!("  Remote address: {}", config.relay.remote_addr);
        println!("  Log file: {}", config.relay.log_file.display());
        println!("  Buffer size: {} bytes", config.relay.buffer_size);
        println!("  Chunk logging: {}", if config.hooks.log_chunks { "enabled" } else { "disabled" });
        println!("  Replace rules: {}", config.hooks.replace.len());
        return ExitCode::SUCCESS;
    }

    if let Err(e) = init_tracing(&args.log_level, &config.relay.log_file) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let manager = match ConnectionManager::bind(&config, config.build_hooks()).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    manager.run(shutdown::wait_for_signal()).await;
    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Defaults < config file < environment < CLI flags
fn load_config(args: &CliArgs) -> Result<mitm_relay::Config> {
    let mut config = match &args.config {
        Some(path) => ConfigManager::load_from_file(path)?,
        None => mitm_relay::Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;

    if let Some(local) = &args.local {
        config.relay.listen_addr = local.clone();
    }
    if let Some(remote) = &args.remote {
        config.relay.remote_addr = remote.clone();
    }
    if let Some(path) = &args.log_file {
        config.relay.log_file = path.clone();
    }
    if let Some(size) = args.buffer_size {
        config.relay.buffer_size = size;
    }
    if let Some(format) = args.format {
        config.hooks.format = format;
    }
    if args.no_dump {
        config.hooks.log_chunks = false;
    }
    config.hooks.replace.extend(args.replace.iter().cloned());

    config
        .validate()
        .context("Final configuration validation failed")?;
    Ok(config)
}

/// Log to stderr and append to `log_file`
fn init_tracing(log_level: &str, log_file: &Path) -> std::result::Result<(), StartupError> {
    let file = open_log_file(log_file)?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_target(false)
                .with_ansi(false),
        )
        .init();

    Ok(())
}

fn open_log_file(path: &Path) -> std::result::Result<File, StartupError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| StartupError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}
