#![forbid(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use radio_common::crypto::LazyKeyPair;
use radio_common::{Coordinates, RadioId};
use radio_plane::config::{load_config, Cli};
use radio_plane::{plane, ClientOptions, Plane, RadioClient};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(ref tower) = cli.tower {
        config.tower = tower.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let id = cli
        .seq
        .map_or_else(|| RadioId::random(&config.prefix), |seq| RadioId::new(&config.prefix, seq));
    let radio = config.radio.radio_config();
    let delegate = Arc::new(Plane::new(Coordinates::from(&config.position), radio));
    let keys = LazyKeyPair::new(radio.key_length);
    let options = ClientOptions {
        legacy_key_file: Some(config.radio.legacy_key_file.clone()),
        queue_capacity: config.queue_capacity,
    };

    info!(%id, tower = %config.tower, "connecting");
    let client = RadioClient::connect(config.tower.as_str(), id, delegate.clone(), &keys, options)
        .await
        .with_context(|| format!("linking to tower {}", config.tower))?;

    if let Some(ref reason) = cli.mayday {
        plane::mayday(&client, reason).await?;
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
            }
            shutdown.cancel();
        }
    });

    let interval = Duration::from_secs(config.keepalive.interval_s);
    plane::fly(&client, &delegate, interval, shutdown).await?;
    client.close().await;
    Ok(())
}
