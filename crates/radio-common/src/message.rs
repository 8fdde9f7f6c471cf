//! The message shape every codec and queue operates on.

use crate::crypto::PublicKey;
use crate::types::{Coordinates, MessageType, RadioId};
use std::cmp::Ordering;

/// Type-specific content of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Greeting carrying the sender's requested (or negotiated) flags.
    Hello {
        /// Encrypted link wanted.
        ciphered: bool,
        /// Extended protocol wanted.
        extended: bool,
    },
    /// Opaque application bytes. Dropped by the legacy codec.
    Data(Vec<u8>),
    /// Emergency with a free-form reason. The reason is dropped by the
    /// legacy codec.
    Mayday {
        /// Human readable cause, e.g. `low fuel`.
        reason: String,
    },
    /// Public key transfer, optionally with a session key wrapped under the
    /// receiver's key (extended links only).
    SendRsa {
        /// Sender's RSA public key.
        key: PublicKey,
        /// Session key sealed to the receiver.
        sealed_key: Option<Vec<u8>>,
    },
    /// Stop sending.
    Choke,
    /// Resume sending.
    Unchoke,
    /// Sender is leaving.
    Bye,
    /// Routing instruction.
    Routing,
    /// Liveness report.
    Keepalive,
    /// Landing slot request.
    LandingRequest,
}

impl Payload {
    /// Message type this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        match self {
            Self::Hello { .. } => MessageType::Hello,
            Self::Data(_) => MessageType::Data,
            Self::Mayday { .. } => MessageType::Mayday,
            Self::SendRsa { .. } => MessageType::SendRsa,
            Self::Choke => MessageType::Choke,
            Self::Unchoke => MessageType::Unchoke,
            Self::Bye => MessageType::Bye,
            Self::Routing => MessageType::Routing,
            Self::Keepalive => MessageType::Keepalive,
            Self::LandingRequest => MessageType::LandingRequest,
        }
    }

    /// Payload for types that carry nothing beyond the header.
    #[must_use]
    pub const fn bare(kind: MessageType) -> Option<Self> {
        match kind {
            MessageType::Choke => Some(Self::Choke),
            MessageType::Unchoke => Some(Self::Unchoke),
            MessageType::Bye => Some(Self::Bye),
            MessageType::Routing => Some(Self::Routing),
            MessageType::Keepalive => Some(Self::Keepalive),
            MessageType::LandingRequest => Some(Self::LandingRequest),
            MessageType::Hello
            | MessageType::Data
            | MessageType::Mayday
            | MessageType::SendRsa => None,
        }
    }
}

/// One radio message: sender, urgency, sender position and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender.
    pub id: RadioId,
    /// Delivery urgency; higher is delivered first.
    pub priority: i32,
    /// Sender position when the message was built.
    pub position: Coordinates,
    /// Type-specific content.
    pub payload: Payload,
}

impl Message {
    /// Builds a message with the default priority for its type.
    #[must_use]
    pub fn new(id: RadioId, position: Coordinates, payload: Payload) -> Self {
        Self {
            id,
            priority: payload.kind().default_priority(),
            position,
            payload,
        }
    }

    /// Overrides the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Message type.
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        self.payload.kind()
    }

    /// HELLO with the given flags.
    #[must_use]
    pub fn hello(id: RadioId, position: Coordinates, ciphered: bool, extended: bool) -> Self {
        Self::new(id, position, Payload::Hello { ciphered, extended })
    }

    /// DATA carrying `bytes`.
    #[must_use]
    pub fn data(id: RadioId, position: Coordinates, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(id, position, Payload::Data(bytes.into()))
    }

    /// MAYDAY with a reason.
    #[must_use]
    pub fn mayday(id: RadioId, position: Coordinates, reason: impl Into<String>) -> Self {
        Self::new(
            id,
            position,
            Payload::Mayday {
                reason: reason.into(),
            },
        )
    }

    /// SENDRSA announcing `key`, optionally with a wrapped session key.
    #[must_use]
    pub fn send_rsa(
        id: RadioId,
        position: Coordinates,
        key: PublicKey,
        sealed_key: Option<Vec<u8>>,
    ) -> Self {
        Self::new(id, position, Payload::SendRsa { key, sealed_key })
    }

    /// Payload-free message of `kind`, or `None` if `kind` needs content.
    #[must_use]
    pub fn bare(id: RadioId, position: Coordinates, kind: MessageType) -> Option<Self> {
        Payload::bare(kind).map(|payload| Self::new(id, position, payload))
    }
}

/// Anything that can wait in a priority queue.
pub trait Prioritized {
    /// Delivery urgency; higher is served first.
    fn priority(&self) -> i32;
}

impl Prioritized for Message {
    fn priority(&self) -> i32 {
        self.priority
    }
}

/// A queued item with its priority and arrival sequence.
///
/// Ordered so that a max-heap pops the highest priority first and, among
/// equal priorities, the earliest arrival first.
#[derive(Debug)]
pub struct Stamped<T> {
    /// Priority captured at enqueue time.
    pub priority: i32,
    /// Monotonic arrival counter of the owning queue.
    pub seq: u64,
    /// The queued value.
    pub item: T,
}

impl<T> PartialEq for Stamped<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Stamped<T> {}

impl<T> PartialOrd for Stamped<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Stamped<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
