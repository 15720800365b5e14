//! Decap build scheduler daemon

use anyhow::Context;
use clap::{Parser, ValueEnum};
use decap_config::load_system_config;
use decap_server::AppState;
use decap_server::tasks::{Shutdown, spawn_deferral_ticker, spawn_reaper};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "decap-server")]
#[command(about = "Decap build scheduler", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "DECAP_CONFIG", default_value = "decap.kdl")]
    config: PathBuf,

    /// Log output format
    #[arg(long, env = "DECAP_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!(path = %cli.config.display(), "Loading configuration");
    let config = load_system_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let state = AppState::connect(&config).await?;

    let (stop, shutdown) = Shutdown::channel();
    let ticker = spawn_deferral_ticker(&state, &shutdown);
    let reaper = spawn_reaper(&state, &shutdown);

    info!("Build scheduler running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutting down");
    state.orchestrator.close_queue();
    let _ = stop.send(true);
    let _ = tokio::join!(ticker, reaper);

    Ok(())
}
