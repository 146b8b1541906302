// Cadence decision scheduler
// Main entry point for the cadence binary

use clap::Parser;
use cadence_engine::cli::{Cli, Command};
use cadence_engine::config::Config;
use cadence_engine::handlers::{
    handle_config, handle_run, handle_status, handle_tune, OutputFormat,
};
use cadence_engine::telemetry::{init_telemetry_with_format, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over config; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_format(level, LogFormat::from_config(&config.core.log_format));

    tracing::info!("Cadence v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run { rescan_secs } => handle_run(&config, rescan_secs).await,
        Command::Status => handle_status(&config, format).await,
        Command::Config => handle_config(&config, format),
        Command::Tune { key, value } => handle_tune(&config, &key, value.as_deref()).await,
    }
}
