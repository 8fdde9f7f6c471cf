//! Control tower radio server: accepts plane connections, runs the HELLO
//! handshake, registers each plane by radio id and delivers inbound traffic
//! to the tower in priority order.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Single consumer of the global inbound queue.
pub mod dispatcher;
/// Error types for tower operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Radio id based table of connected planes.
pub mod registry;
/// Accept loop and shared server state.
pub mod server;
/// The tower delegate.
pub mod tower;

pub use error::TowerError;
pub use server::{run, run_with_shutdown, ServerState};
pub use tower::{Tower, TowerEvent};
