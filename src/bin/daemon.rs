use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use magrelay::{
    config::{AppConfig, TomlConfigStore, resolve_config_path},
    daemon::MagrelayDaemon,
};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "magrelay-daemon")]
struct DaemonArgs {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonArgs::parse();
    let env_filter = match args.log_level {
        Some(l) => l.parse()?,
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env()?,
    };
    fmt().with_env_filter(env_filter).init();

    let init_span = tracing::span!(tracing::Level::INFO, "daemon_init").entered();

    let config_path = resolve_config_path(args.config)?;
    let config = AppConfig::from_path(&config_path)
        .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
    tracing::trace!("Loaded daemon configuration");

    let daemon = MagrelayDaemon::from_config(&config, TomlConfigStore::new(config_path))?;
    tracing::info!("Daemon initialized successfully");
    drop(init_span);

    daemon.run().await?;

    tracing::info!("Daemon stopped");
    Ok(())
}
