use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use magrelay::cli::{self, Args};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    // CLI arg > env var > default
    let env_filter = match &args.log_level {
        Some(l) => l.parse()?,
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env()?,
    };
    fmt().with_env_filter(env_filter).init();

    let all_dispatched = cli::run(args).await?;

    Ok(if all_dispatched {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
