use crate::server::ServerState;
use axum::extract::State;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    tower: String,
}

/// Readiness check response.
#[derive(Serialize, Debug, PartialEq, Eq)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
    planes: usize,
    connections: usize,
}

/// Shared readiness flag, cleared when the tower starts shutting down.
#[derive(Clone, Debug)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a health state that starts ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the tower as ready or draining.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the tower accepts planes.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
struct Probe {
    health: HealthState,
    tower: Arc<ServerState>,
}

/// Serve `/metrics`, `/health` and `/ready` on `addr`.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or binding fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health: HealthState,
    tower: Arc<ServerState>,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(Probe { health, tower });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Returns 200 while the process runs.
async fn health_handler(State(probe): State<Probe>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            tower: probe.tower.id.to_string(),
        }),
    )
}

fn readiness(health: &HealthState, tower: &ServerState) -> (StatusCode, ReadyResponse) {
    let ready = health.is_ready();
    let body = ReadyResponse {
        status: if ready { "ready" } else { "draining" },
        ready,
        planes: tower.registry.len(),
        connections: tower.active_connections.load(Ordering::Relaxed),
    };
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, body)
}

/// Returns 200 with registry counts when ready, 503 while draining.
async fn ready_handler(State(probe): State<Probe>) -> (StatusCode, Json<ReadyResponse>) {
    let (code, body) = readiness(&probe.health, &probe.tower);
    (code, Json(body))
}

/// Connection and registry gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("radio_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("radio_connections_active").decrement(1.0);
    }

    /// Set the registered peers gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn peers_registered(count: usize) {
        metrics::gauge!("radio_peers_registered").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Record a handshake outcome with the given status label.
    pub fn handshakes_total(status: &'static str) {
        metrics::counter!("radio_handshakes_total", "status" => status).increment(1);
    }

    /// Record a registration attempt with the given status label.
    pub fn registrations_total(status: &'static str) {
        metrics::counter!("radio_registrations_total", "status" => status).increment(1);
    }

    /// Increment the received-messages counter for a message type.
    pub fn messages_received_total(kind: &'static str) {
        metrics::counter!("radio_messages_received_total", "type" => kind).increment(1);
    }

    /// Increment the sent-messages counter for a message type.
    pub fn messages_sent_total(kind: &'static str) {
        metrics::counter!("radio_messages_sent_total", "type" => kind).increment(1);
    }

    /// Increment the dropped-messages counter with the given reason label.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("radio_messages_dropped_total", "reason" => reason).increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record how long a handshake took, in seconds.
    pub fn handshake_seconds(value: f64) {
        metrics::histogram!("radio_handshake_seconds").record(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use radio_common::{Coordinates, Message, RadioConfig, RadioDelegate, RadioId};

    struct Silent;

    impl RadioDelegate for Silent {
        fn location(&self) -> Coordinates {
            Coordinates::default()
        }

        fn config(&self) -> RadioConfig {
            RadioConfig::default()
        }

        fn on_message(&self, _from: RadioId, _message: Message) {}
    }

    fn tower() -> ServerState {
        let config = ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            max_conns: 10,
            handshake_timeout: 5,
            inbound_capacity: 8,
            outbound_capacity: 8,
            prefix: "TWR".to_string(),
        };
        ServerState::new(config, Arc::new(Silent))
    }

    #[test]
    fn ready_reports_counts() {
        let (code, body) = readiness(&HealthState::new(), &tower());
        assert_eq!(code, StatusCode::OK);
        assert_eq!(
            body,
            ReadyResponse {
                status: "ready",
                ready: true,
                planes: 0,
                connections: 0
            }
        );
    }

    #[test]
    fn draining_is_not_ready() {
        let health = HealthState::new();
        health.set_ready(false);
        let (code, body) = readiness(&health, &tower());
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.ready);
        assert_eq!(body.status, "draining");
    }
}
