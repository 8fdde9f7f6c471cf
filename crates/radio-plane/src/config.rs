use clap::Parser;
use radio_common::{Coordinates, RadioConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI interface for the plane.
#[derive(Parser, Debug)]
#[command(name = "radio-plane", about = "Plane radio client")]
#[command(version)]
pub struct Cli {
    /// Path to a custom configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Tower address override (`host:port`).
    #[arg(long)]
    pub tower: Option<String>,

    /// Sequence number for the plane id; random when omitted.
    #[arg(long)]
    pub seq: Option<u32>,

    /// Send a MAYDAY with this reason right after connecting.
    #[arg(long)]
    pub mayday: Option<String>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Runtime configuration loaded from file, env, and defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct PlaneConfig {
    /// Tower address, `host:port`.
    pub tower: String,
    /// Prefix of the plane's radio id.
    pub prefix: String,
    /// Link options requested from the tower.
    pub radio: RadioSection,
    /// Periodic KEEPALIVE settings.
    pub keepalive: KeepaliveConfig,
    /// Starting position.
    pub position: PositionConfig,
    /// Capacity of the outbound and inbound queues.
    pub queue_capacity: usize,
}

/// Link options.
#[derive(Debug, Deserialize, Clone)]
pub struct RadioSection {
    /// Ask for an encrypted link.
    pub ciphered: bool,
    /// Stay on legacy framing.
    pub legacy: bool,
    /// RSA modulus length in bits.
    pub key_length: usize,
    /// Tower public key for ciphered legacy links.
    pub legacy_key_file: PathBuf,
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            ciphered: true,
            legacy: false,
            key_length: radio_common::crypto::DEFAULT_KEY_BITS,
            legacy_key_file: PathBuf::from("tower.key"),
        }
    }
}

impl RadioSection {
    /// The options handed to the radio engine.
    #[must_use]
    pub const fn radio_config(&self) -> RadioConfig {
        RadioConfig {
            ciphered: self.ciphered,
            legacy: self.legacy,
            key_length: self.key_length,
        }
    }
}

/// KEEPALIVE settings.
#[derive(Debug, Deserialize, Clone)]
pub struct KeepaliveConfig {
    /// Interval between KEEPALIVE frames, in seconds.
    pub interval_s: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self { interval_s: 5 }
    }
}

/// Starting position.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PositionConfig {
    /// East-west.
    pub x: i32,
    /// North-south.
    pub y: i32,
    /// Altitude.
    pub z: i32,
}

impl From<&PositionConfig> for Coordinates {
    fn from(p: &PositionConfig) -> Self {
        Self::new(p.x, p.y, p.z)
    }
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            tower: "127.0.0.1:4242".to_string(),
            prefix: "PLN".to_string(),
            radio: RadioSection::default(),
            keepalive: KeepaliveConfig::default(),
            position: PositionConfig::default(),
            queue_capacity: 256,
        }
    }
}

impl PlaneConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.tower.is_empty() {
            return Err("tower address must not be empty".to_string());
        }
        if !self.tower.contains(':') {
            return Err(format!(
                "tower address must be host:port, got: {}",
                self.tower
            ));
        }

        if self.prefix.is_empty() || self.prefix.len() > 7 || !self.prefix.is_ascii() {
            return Err("prefix must be 1 to 7 ASCII characters".to_string());
        }

        if self.keepalive.interval_s == 0 {
            return Err("keepalive.interval_s must be greater than 0".to_string());
        }

        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PlaneConfig> {
    let defaults = PlaneConfig::default();
    let mut builder = config::Config::builder()
        .set_default("tower", defaults.tower.as_str())?
        .set_default("prefix", defaults.prefix.as_str())?
        .set_default("radio.ciphered", defaults.radio.ciphered)?
        .set_default("radio.legacy", defaults.radio.legacy)?
        .set_default("radio.key_length", defaults.radio.key_length as i64)?
        .set_default(
            "radio.legacy_key_file",
            &*defaults.radio.legacy_key_file.to_string_lossy(),
        )?
        .set_default("keepalive.interval_s", defaults.keepalive.interval_s as i64)?
        .set_default("position.x", i64::from(defaults.position.x))?
        .set_default("position.y", i64::from(defaults.position.y))?
        .set_default("position.z", i64::from(defaults.position.z))?
        .set_default("queue_capacity", defaults.queue_capacity as i64)?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    } else if let Some(config_path) = dirs::config_dir()
        .map(|d| d.join("radio-plane").join("config.toml"))
        .filter(|p| p.exists())
    {
        builder = builder.add_source(config::File::from(config_path));
    }

    builder = builder.add_source(config::Environment::with_prefix("PLANE").separator("__"));

    let settings = builder.build()?;
    let config: PlaneConfig = settings.try_deserialize()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::field_reassign_with_default)]
    use super::*;
    use std::io::Write;

    #[test]
    fn test_plane_config_default_has_expected_values() {
        let config = PlaneConfig::default();

        assert_eq!(config.tower, "127.0.0.1:4242");
        assert_eq!(config.prefix, "PLN");
        assert!(config.radio.ciphered);
        assert!(!config.radio.legacy);
        assert_eq!(config.radio.key_length, 1024);
        assert_eq!(config.radio.legacy_key_file, PathBuf::from("tower.key"));
    }

    #[test]
    fn test_missing_config_file_yields_plane_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/config.toml")))
            .expect("load_config should succeed with no file");

        assert_eq!(config.tower, "127.0.0.1:4242");
        assert_eq!(config.keepalive.interval_s, 5);
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn test_load_config_reads_toml_overrides() {
        let dir = std::env::temp_dir().join(format!("radio-plane-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "tower = \"10.0.0.1:5000\"\n[radio]\nciphered = false\nlegacy = true\n[position]\nx = -3\nz = 1200"
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(config.tower, "10.0.0.1:5000");
        assert!(!config.radio.ciphered);
        assert!(config.radio.legacy);
        assert_eq!(config.radio.key_length, 1024);
        assert_eq!(Coordinates::from(&config.position), Coordinates::new(-3, 0, 1200));
    }

    #[test]
    fn test_radio_config_mirrors_section() {
        let section = RadioSection {
            ciphered: false,
            legacy: true,
            key_length: 2048,
            legacy_key_file: PathBuf::from("k"),
        };
        assert_eq!(
            section.radio_config(),
            RadioConfig {
                ciphered: false,
                legacy: true,
                key_length: 2048
            }
        );
    }

    #[test]
    fn test_plane_defaults_are_valid() {
        assert!(PlaneConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_tower() {
        let mut config = PlaneConfig::default();
        config.tower = String::new();
        assert!(config.validate().unwrap_err().contains("must not be empty"));
    }

    #[test]
    fn test_validate_rejects_tower_without_port() {
        let mut config = PlaneConfig::default();
        config.tower = "tower.local".to_string();
        assert!(config.validate().unwrap_err().contains("host:port"));
    }

    #[test]
    fn test_validate_rejects_long_prefix() {
        let mut config = PlaneConfig::default();
        config.prefix = "PLANE123".to_string();
        assert!(config.validate().unwrap_err().contains("prefix"));
    }

    #[test]
    fn test_validate_rejects_keepalive_of_zero_seconds() {
        let mut config = PlaneConfig::default();
        config.keepalive.interval_s = 0;
        assert!(config.validate().unwrap_err().contains("keepalive"));
    }

    #[test]
    fn test_validate_rejects_zero_queue_capacity() {
        let mut config = PlaneConfig::default();
        config.queue_capacity = 0;
        assert!(config.validate().unwrap_err().contains("queue_capacity"));
    }
}
