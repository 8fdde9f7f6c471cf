//! Common types and protocol machinery shared by planes and towers.
//!
//! This crate provides:
//! - Message catalog, wire tags and default priorities ([`types`], [`message`])
//! - Legacy and extended frame layouts ([`frame`]) behind a swappable stream
//!   codec ([`codec`])
//! - RSA key exchange and legacy key files ([`crypto`]) plus body sealing
//!   ([`cipher`])
//! - The HELLO/SENDRSA handshake ([`handshake`]) and connection lifecycle
//!   ([`state`])
//! - A bounded priority queue ([`queue`]) and the owner callback trait
//!   ([`delegate`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cipher;
pub mod codec;
pub mod crypto;
pub mod delegate;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod queue;
pub mod state;
pub mod types;

pub use codec::RadioCodec;
pub use delegate::RadioDelegate;
pub use frame::FrameError;
pub use message::{Message, Payload, Prioritized};
pub use queue::{PriorityQueue, QueueError};
pub use state::{ConnectionState, Lifecycle};
pub use types::{Coordinates, MessageType, RadioConfig, RadioId};
