//! Plane radio client: links to a tower, sends prioritized traffic and a
//! periodic KEEPALIVE, and hands tower messages to the plane.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI parsing and TOML configuration.
pub mod config;
/// The plane delegate and its flight loop.
pub mod plane;
/// Tower link: handshake plus reader, writer and dispatcher tasks.
pub mod radio;

pub use plane::Plane;
pub use radio::{ClientOptions, RadioClient, RadioError};
