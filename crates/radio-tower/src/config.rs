use clap::Parser;
use radio_common::{Coordinates, RadioConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments for the tower.
#[derive(Parser, Debug, Clone)]
#[command(name = "radio-tower")]
#[command(about = "Air-traffic control tower radio server")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:4242", env = "RADIO_TOWER_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "RADIO_TOWER_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent plane connections.
    #[arg(long, default_value = "1000", env = "RADIO_TOWER_MAX_CONNS")]
    pub max_conns: usize,
    /// HELLO/SENDRSA handshake timeout in seconds.
    #[arg(long, default_value = "5", env = "RADIO_TOWER_HANDSHAKE_TIMEOUT")]
    pub handshake_timeout: u64,
    /// Capacity of the global inbound queue.
    #[arg(long, default_value = "4096", env = "RADIO_TOWER_INBOUND_CAPACITY")]
    pub inbound_capacity: usize,
    /// Capacity of each plane's outbound queue.
    #[arg(long, default_value = "256", env = "RADIO_TOWER_OUTBOUND_CAPACITY")]
    pub outbound_capacity: usize,
    /// Prefix of the tower's radio id.
    #[arg(long, default_value = "TWR", env = "RADIO_TOWER_PREFIX")]
    pub prefix: String,
    /// Accept ciphered links.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "RADIO_TOWER_CIPHERED")]
    pub ciphered: bool,
    /// Refuse the extended protocol.
    #[arg(long, env = "RADIO_TOWER_LEGACY")]
    pub legacy: bool,
    /// RSA key length in bits.
    #[arg(long, default_value = "1024", env = "RADIO_TOWER_KEY_LENGTH")]
    pub key_length: usize,
    /// Tower position, east-west.
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub x: i32,
    /// Tower position, north-south.
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub y: i32,
    /// Tower altitude.
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub z: i32,
    /// Write the tower public key in the legacy key file layout and keep
    /// serving with the same key.
    #[arg(long, env = "RADIO_TOWER_EXPORT_KEY")]
    pub export_legacy_key: Option<PathBuf>,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent plane connections.
    pub max_conns: usize,
    /// Handshake timeout in seconds.
    pub handshake_timeout: u64,
    /// Capacity of the global inbound queue.
    pub inbound_capacity: usize,
    /// Capacity of each plane's outbound queue.
    pub outbound_capacity: usize,
    /// Prefix of the tower's radio id.
    pub prefix: String,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 100_000 {
            return Err("max_conns exceeds reasonable limit (100,000)".to_string());
        }

        if self.handshake_timeout == 0 {
            return Err("handshake_timeout must be greater than 0".to_string());
        }
        if self.handshake_timeout > 300 {
            return Err("handshake_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.inbound_capacity == 0 {
            return Err("inbound_capacity must be greater than 0".to_string());
        }
        if self.outbound_capacity == 0 {
            return Err("outbound_capacity must be greater than 0".to_string());
        }
        if self.outbound_capacity > self.inbound_capacity {
            return Err("outbound_capacity cannot exceed inbound_capacity".to_string());
        }

        if self.prefix.is_empty() || self.prefix.len() > 7 || !self.prefix.is_ascii() {
            return Err("prefix must be 1 to 7 ASCII characters".to_string());
        }
        Ok(())
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }
}

impl From<&Args> for ServerConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            max_conns: args.max_conns,
            handshake_timeout: args.handshake_timeout,
            inbound_capacity: args.inbound_capacity,
            outbound_capacity: args.outbound_capacity,
            prefix: args.prefix.clone(),
        }
    }
}

impl Args {
    /// Radio options the tower applies to every connection.
    #[must_use]
    pub const fn radio(&self) -> RadioConfig {
        RadioConfig {
            ciphered: self.ciphered,
            legacy: self.legacy,
            key_length: self.key_length,
        }
    }

    /// Tower position.
    #[must_use]
    pub const fn position(&self) -> Coordinates {
        Coordinates::new(self.x, self.y, self.z)
    }
}
