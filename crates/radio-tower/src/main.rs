#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use radio_common::crypto;
use radio_tower::config::{Args, ServerConfig};
use radio_tower::metrics::{start_metrics_server, HealthState};
use radio_tower::server::ServerState;
use radio_tower::{run_with_shutdown, Tower};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = ServerConfig::from(&args);
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let radio = args.radio();
    let delegate = Arc::new(Tower::new(args.position(), radio));

    let state = if let Some(ref path) = args.export_legacy_key {
        let bits = radio.key_length;
        let pair = tokio::task::spawn_blocking(move || crypto::generate_key_pair(bits))
            .await
            .context("key generation task failed")??;
        crypto::write_legacy_key(path, pair.public())
            .with_context(|| format!("writing legacy key file {}", path.display()))?;
        info!("wrote legacy tower key to {}", path.display());
        ServerState::with_keys(config.clone(), delegate, pair)
    } else {
        ServerState::new(config.clone(), delegate)
    };
    let state = Arc::new(state);
    info!(
        id = %state.id,
        ciphered = radio.ciphered,
        legacy = radio.legacy,
        "tower starting"
    );

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    let health_state = HealthState::new();

    tokio::spawn({
        let health_state = health_state.clone();
        let state = Arc::clone(&state);
        async move {
            if let Err(e) = start_metrics_server(config.metrics_addr, health_state, state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        let health_state = health_state.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
            }
            health_state.set_ready(false);
            shutdown.cancel();
        }
    });

    run_with_shutdown(listener, state, shutdown).await?;
    Ok(())
}
