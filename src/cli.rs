use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{
    adapter::{DispatchReport, MagnetAdapter},
    backend::BackendKind,
    command::{Route, registered_commands},
    config::{AppConfig, TomlConfigStore, resolve_config_path},
    notify::ConsoleNotifier,
};

#[derive(Debug, Parser)]
#[command(name = "magrelay", about = "Send magnet links to a download backend")]
pub struct Args {
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit magnet links, one per argument.
    Add {
        #[arg(required = true)]
        magnets: Vec<String>,
        /// Backend to use instead of the configured downloader.
        #[arg(short, long, value_enum)]
        backend: Option<BackendKind>,
        #[arg(short, long)]
        save_path: Option<String>,
        #[arg(long)]
        paused: bool,
    },
    /// Dispatch the magnet links queued in the configuration file.
    Drain,
    /// Print the chat commands understood by the daemon.
    Commands,
}

/// Execute a parsed command line, returning whether every magnet was dispatched.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the adapter cannot be built.
pub async fn run(args: Args) -> Result<bool> {
    let reports = match args.command {
        Command::Commands => {
            for spec in registered_commands() {
                println!(
                    "{:<8} {:<16} {} {}",
                    spec.command,
                    spec.action,
                    spec.description,
                    spec.payload()
                );
            }
            return Ok(true);
        }
        Command::Add {
            magnets,
            backend,
            save_path,
            paused,
        } => {
            let (_, mut config) = load_config(args.config)?;

            let route = match backend {
                Some(BackendKind::Xunlei) => Route::Xunlei,
                Some(kind) => {
                    config.general.downloader = kind;
                    Route::Torrent
                }
                None => Route::Torrent,
            };
            if save_path.is_some() {
                config.general.save_path = save_path;
            }
            config.general.paused |= paused;

            let adapter = MagnetAdapter::from_config(&config, Arc::new(ConsoleNotifier))?;
            adapter
                .dispatch_batch(route, &magnets.join("\n"), None, None)
                .await
        }
        Command::Drain => {
            let (config_path, config) = load_config(args.config)?;
            let adapter = MagnetAdapter::from_config(&config, Arc::new(ConsoleNotifier))?;
            adapter
                .drain_queued(&TomlConfigStore::new(config_path))
                .await?
        }
    };

    Ok(reports.iter().all(DispatchReport::is_success))
}

fn load_config(cli: Option<PathBuf>) -> Result<(PathBuf, AppConfig)> {
    let config_path = resolve_config_path(cli)?;
    let config = AppConfig::from_path(&config_path)
        .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
    tracing::debug!("Loaded configuration from {}", config_path.display());
    Ok((config_path, config))
}
