//! avatar-overlay-daemon: input-reactive avatar for stream overlays
//!
//! The daemon resolves three input channels into one displayed sprite:
//! - Voice loudness from a PCM stream (talk / scream)
//! - Movement keys relayed from a global input hook (wasd)
//! - Mouse clicks relayed from the same hook (mouse)
//!
//! Frame changes are published to subscribers of the IPC socket, which
//! also exposes the engine's test hooks.

mod audio;
mod config;
mod diagnostics;
mod events;
mod ipc;
mod lifecycle;
mod relay;
mod sprite;
mod state;
mod timer;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::PcmSampler;
use crate::config::Config;
use crate::events::OverlayEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::relay::RelayClient;
use crate::state::OverlayEngine;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file (falls back to $AVATAR_OVERLAY_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show the diagnostic readout
    #[arg(long)]
    debug: bool,

    /// Override the relay WebSocket address
    #[arg(long)]
    relay_url: Option<String>,

    /// PCM source for the microphone (s16le mono, `-` for stdin)
    #[arg(long)]
    mic: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "avatar-overlay-daemon starting"
    );

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if args.debug {
        config.debug = true;
    }
    if let Some(url) = args.relay_url {
        config.relay_url = url;
    }
    if let Some(mic) = args.mic {
        config.mic.source = Some(mic);
    }
    config.validate()?;
    info!(
        relay_url = %config.relay_url,
        socket_path = ?config.socket_path,
        sprites = config.sprites.len(),
        "configuration loaded"
    );

    let shutdown = ShutdownSignal::new();

    // Engine -> IPC subscribers and the log
    let (event_tx, _event_rx) = broadcast::channel::<OverlayEvent>(64);

    let (engine, handle) = OverlayEngine::new(&config, event_tx.clone());
    let engine_task = tokio::spawn(engine.run());

    let relay = RelayClient::new(config.relay_url.clone(), config.reconnect_delay, handle.clone());
    let relay_task = tokio::spawn(relay.run());

    let sampler_task = match &config.mic.source {
        Some(source) => {
            let sampler = PcmSampler::new(
                source,
                config.mic.fft_size,
                config.mic.smoothing,
                handle.clone(),
            );
            Some(tokio::spawn(sampler.run()))
        }
        None => {
            warn!("no microphone source configured, voice channel disabled");
            None
        }
    };

    let diagnostics_task = config
        .debug
        .then(|| tokio::spawn(diagnostics::run(handle.clone(), config.diagnostics_interval)));

    let server = Server::new(&config.socket_path, handle.clone(), event_tx.clone())?;
    drop(handle);

    let mut log_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => debug!(%event, "overlay event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "overlay event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("overlay event stream closed");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    relay_task.abort();
    if let Some(task) = sampler_task {
        task.abort();
    }
    if let Some(task) = diagnostics_task {
        task.abort();
    }
    server.shutdown().await;
    engine_task.abort();

    info!("avatar-overlay-daemon stopped");

    Ok(())
}
