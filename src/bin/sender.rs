//! Audio Sender Application
//!
//! Captures audio and streams it to whichever receiver last sent HELLO.
//!
//! Usage: `sender [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hello_caster::{AppConfig, Session};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(AppConfig::default_path);

    let config = match &config_path {
        Some(path) => AppConfig::load_or_default(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AppConfig::default(),
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Hello Caster sender");
    if let Some(path) = &config_path {
        tracing::info!("Configuration: {}", path.display());
    }

    let mut session = Session::with_cpal();
    session
        .start(config.session.clone())
        .context("Failed to start streaming session")?;

    tracing::info!(
        "Waiting for a receiver to send HELLO to port {}",
        session
            .discovery_addr()
            .map(|a| a.port())
            .unwrap_or(config.session.network.discovery_port)
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut stats_timer = tokio::time::interval(Duration::from_secs(5));
    stats_timer.tick().await;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::warn!("Ctrl-C handler failed: {}", e);
                }
                break;
            }
            _ = stats_timer.tick() => {
                if let Some(stats) = session.stats() {
                    tracing::info!(
                        "Stats: peer {}, {} captured, {} dropped, {} sent ({:.1} KB), {} encode / {} send errors",
                        session.peer(),
                        stats.frames_captured,
                        stats.frames_dropped,
                        stats.sender.packets_sent,
                        stats.sender.bytes_sent as f64 / 1024.0,
                        stats.sender.encode_errors,
                        stats.sender.send_errors
                    );
                }
            }
        }
    }

    tracing::info!("Shutting down");
    session.stop();
    Ok(())
}
