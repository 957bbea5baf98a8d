use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use opsdesk_sync::{EngineNotice, FileConfig, SyncConfig, load_config};

/// Session probe: connects to the messaging backend and logs what the
/// engine publishes. Useful for watching a backend without the console.
#[derive(Parser)]
#[command(name = "opsdesk")]
#[command(about = "Chat synchronization engine for the opsdesk console")]
struct Cli {
    /// Custom data directory (defaults to ~/.opsdesk)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the backend WebSocket URL
    #[arg(long)]
    ws_url: Option<String>,

    /// Override the backend REST URL
    #[arg(long)]
    api_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "opsdesk_sync=debug"
    } else {
        "opsdesk_sync=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::home_dir()
            .expect("Could not find home directory")
            .join(".opsdesk")
    });
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    let fc: FileConfig = load_config(&data_dir)
        .extract()
        .context("Invalid configuration")?;
    let mut config = SyncConfig::from_file(&fc);
    if let Some(ws_url) = cli.ws_url {
        config.ws_url = ws_url;
    }
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }

    info!("Connecting to {}", config.ws_url);
    let engine = opsdesk_sync::spawn(config);
    let mut notices = engine.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                engine.shutdown();
                break;
            }
            notice = notices.recv() => match notice {
                Ok(EngineNotice::Status(n)) => {
                    info!("[{:?}] {}: {}", n.severity, n.tag, n.message);
                }
                Ok(EngineNotice::DirectoryUpdated) => {
                    if let Ok(dir) = engine.directory().await {
                        info!(
                            "Directory: {} client / {} colleague conversations",
                            dir.clients.len(),
                            dir.colleagues.len()
                        );
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} notices", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    Ok(())
}
