//! Ferry command line.
//!
//! `ferry serve` runs the coordinator; `ferry send` uploads files to it;
//! `list`, `info`, `download`, `cancel` and `health` act as the receiver.

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ferry_protocol::Priority;
use ferry_sender::HttpCoordinator;
use tracing_subscriber::EnvFilter;

use crate::commands::SendOptions;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "ferry", version, about = "Resumable chunked file transfer")]
struct Cli {
    /// Config file [default: <config dir>/ferry/ferry.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Coordinator URL, overrides `sender.endpoint`
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator server
    Serve {
        /// Address to bind, overrides `coordinator.bind`
        #[arg(long)]
        bind: Option<String>,
        /// Storage directory, overrides `coordinator.data_dir`
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Upload one or more files
    Send {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// low, normal or high
        #[arg(short, long)]
        priority: Option<Priority>,
        /// Chunk size in bytes, instead of the adaptive choice
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Explicit transfer identity (single file only)
        #[arg(long)]
        transfer_id: Option<String>,
    },
    /// List transfers known to the coordinator
    List,
    /// Show one transfer
    Info { id: String },
    /// Download a verified transfer and check its digest
    Download {
        id: String,
        /// Destination path [default: the original file name]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Cancel a transfer
    Cancel { id: String },
    /// Check that the coordinator is up
    Health,
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;
    if let Some(endpoint) = cli.endpoint {
        config.sender.endpoint = endpoint;
    }

    match cli.command {
        Commands::Serve { bind, data_dir } => {
            if let Some(bind) = bind {
                config.coordinator.bind = bind;
            }
            if let Some(dir) = data_dir {
                config.coordinator.data_dir = dir;
            }
            commands::serve(config.coordinator).await
        }
        Commands::Send {
            files,
            priority,
            chunk_size,
            transfer_id,
        } => {
            let opts = SendOptions {
                priority,
                chunk_size,
                transfer_id,
            };
            commands::send(&config.sender, &files, opts).await
        }
        Commands::List => commands::list(&receiver(&config)?).await,
        Commands::Info { id } => commands::info(&receiver(&config)?, &id).await,
        Commands::Download { id, output } => {
            commands::download(&receiver(&config)?, &id, output).await
        }
        Commands::Cancel { id } => commands::cancel(&receiver(&config)?, &id).await,
        Commands::Health => commands::health(&receiver(&config)?).await,
        Commands::Config { write } => {
            print!("{}", toml::to_string_pretty(&config)?);
            if write {
                config.save(&config_path)?;
                eprintln!("wrote {}", config_path.display());
            }
            Ok(())
        }
    }
}

fn receiver(config: &Config) -> Result<HttpCoordinator> {
    Ok(HttpCoordinator::new(
        &config.sender.endpoint,
        config.sender.request_timeout(),
    )?)
}
