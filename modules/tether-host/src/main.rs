use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_common::Config;
use tether_ipc::IpcServer;

mod builtins;

#[derive(Parser)]
#[command(name = "tether-host", about = "Tether event bus host with local IPC")]
struct Cli {
    /// Path to config TOML file. Environment variables override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file_and_env(path)?,
        None => Config::from_env()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter)
                .with_context(|| format!("Invalid log filter {:?}", config.log_filter))?,
        )
        .init();

    info!("Tether host starting...");
    config.log_summary();

    builtins::register();

    if !config.ipc_enabled {
        info!("IPC disabled, waiting for Ctrl-C");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let server = IpcServer::bind(&config)
        .with_context(|| format!("Failed to bind IPC endpoint {}", config.ipc_path))?;
    server
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "Failed to listen for Ctrl-C");
            }
        })
        .await?;

    info!("Tether host stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_flag_is_optional() {
        let cli = Cli::try_parse_from(["tether-host"]).unwrap();
        assert!(cli.config.is_none());

        let cli = Cli::try_parse_from(["tether-host", "--config", "host.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("host.toml")));
    }

    #[test]
    fn test_unknown_argument_is_rejected() {
        assert!(Cli::try_parse_from(["tether-host", "--verbose"]).is_err());
        assert!(Cli::try_parse_from(["tether-host", "--config"]).is_err());
    }
}
