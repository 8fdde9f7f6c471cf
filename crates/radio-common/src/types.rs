//! Core type definitions and protocol constants for the radio link.

use rand::rngs::OsRng;
use rand::Rng;
use std::fmt;

/// Width of a radio identifier on the wire.
pub const RADIO_ID_LEN: usize = 8;

/// Stable wire tags, one per [`MessageType`].
///
/// These values are a contract with deployed peers. New types get new
/// numbers; existing numbers never move.
pub mod tag {
    /// Connection greeting and handshake.
    pub const HELLO: i32 = 0;
    /// Opaque application data.
    pub const DATA: i32 = 1;
    /// Emergency notice.
    pub const MAYDAY: i32 = 2;
    /// RSA public key transfer.
    pub const SENDRSA: i32 = 3;
    /// Ask the peer to stop sending.
    pub const CHOKE: i32 = 4;
    /// Allow the peer to send again.
    pub const UNCHOKE: i32 = 5;
    /// Peer is leaving.
    pub const BYE: i32 = 6;
    /// Routing instruction from the tower.
    pub const ROUTING: i32 = 7;
    /// Periodic liveness and position report.
    pub const KEEPALIVE: i32 = 8;
    /// Plane asks for a landing slot.
    pub const LANDINGREQUEST: i32 = 9;
}

/// Default priority per message type. Higher values are delivered first.
pub mod priority {
    /// Low-fuel and other emergencies outrank everything.
    pub const MAYDAY: i32 = 10;
    /// Handshake greeting.
    pub const HELLO: i32 = 8;
    /// Key transfer belongs to the handshake.
    pub const SENDRSA: i32 = 8;
    /// Flow control.
    pub const CHOKE: i32 = 6;
    /// Flow control.
    pub const UNCHOKE: i32 = 6;
    /// Routing instruction.
    pub const ROUTING: i32 = 5;
    /// Landing request.
    pub const LANDINGREQUEST: i32 = 5;
    /// Departure notice.
    pub const BYE: i32 = 4;
    /// Liveness report.
    pub const KEEPALIVE: i32 = 3;
    /// Bulk data.
    pub const DATA: i32 = 1;
}

/// Closed set of message kinds carried by the radio protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// See [`tag::HELLO`].
    Hello,
    /// See [`tag::DATA`].
    Data,
    /// See [`tag::MAYDAY`].
    Mayday,
    /// See [`tag::SENDRSA`].
    SendRsa,
    /// See [`tag::CHOKE`].
    Choke,
    /// See [`tag::UNCHOKE`].
    Unchoke,
    /// See [`tag::BYE`].
    Bye,
    /// See [`tag::ROUTING`].
    Routing,
    /// See [`tag::KEEPALIVE`].
    Keepalive,
    /// See [`tag::LANDINGREQUEST`].
    LandingRequest,
}

impl MessageType {
    /// Every message type, in tag order.
    pub const ALL: [Self; 10] = [
        Self::Hello,
        Self::Data,
        Self::Mayday,
        Self::SendRsa,
        Self::Choke,
        Self::Unchoke,
        Self::Bye,
        Self::Routing,
        Self::Keepalive,
        Self::LandingRequest,
    ];

    /// Returns the wire tag for this type.
    #[must_use]
    pub const fn tag(self) -> i32 {
        match self {
            Self::Hello => tag::HELLO,
            Self::Data => tag::DATA,
            Self::Mayday => tag::MAYDAY,
            Self::SendRsa => tag::SENDRSA,
            Self::Choke => tag::CHOKE,
            Self::Unchoke => tag::UNCHOKE,
            Self::Bye => tag::BYE,
            Self::Routing => tag::ROUTING,
            Self::Keepalive => tag::KEEPALIVE,
            Self::LandingRequest => tag::LANDINGREQUEST,
        }
    }

    /// Maps a wire tag back to its type, or `None` for unknown tags.
    #[must_use]
    pub const fn from_tag(value: i32) -> Option<Self> {
        match value {
            tag::HELLO => Some(Self::Hello),
            tag::DATA => Some(Self::Data),
            tag::MAYDAY => Some(Self::Mayday),
            tag::SENDRSA => Some(Self::SendRsa),
            tag::CHOKE => Some(Self::Choke),
            tag::UNCHOKE => Some(Self::Unchoke),
            tag::BYE => Some(Self::Bye),
            tag::ROUTING => Some(Self::Routing),
            tag::KEEPALIVE => Some(Self::Keepalive),
            tag::LANDINGREQUEST => Some(Self::LandingRequest),
            _ => None,
        }
    }

    /// Priority used when a message does not set one explicitly.
    #[must_use]
    pub const fn default_priority(self) -> i32 {
        match self {
            Self::Hello => priority::HELLO,
            Self::Data => priority::DATA,
            Self::Mayday => priority::MAYDAY,
            Self::SendRsa => priority::SENDRSA,
            Self::Choke => priority::CHOKE,
            Self::Unchoke => priority::UNCHOKE,
            Self::Bye => priority::BYE,
            Self::Routing => priority::ROUTING,
            Self::Keepalive => priority::KEEPALIVE,
            Self::LandingRequest => priority::LANDINGREQUEST,
        }
    }

    /// Upper-case protocol name, also used as a metrics label.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::Data => "DATA",
            Self::Mayday => "MAYDAY",
            Self::SendRsa => "SENDRSA",
            Self::Choke => "CHOKE",
            Self::Unchoke => "UNCHOKE",
            Self::Bye => "BYE",
            Self::Routing => "ROUTING",
            Self::Keepalive => "KEEPALIVE",
            Self::LandingRequest => "LANDINGREQUEST",
        }
    }

    /// Handshake frames are consumed by the connection itself and never
    /// reach a delegate.
    #[must_use]
    pub const fn is_handshake(self) -> bool {
        matches!(self, Self::Hello | Self::SendRsa)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable 8-byte peer identifier: an ASCII prefix followed by a
/// zero-padded sequence number, e.g. `PLN00042`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RadioId([u8; RADIO_ID_LEN]);

impl RadioId {
    /// Builds an identifier from a prefix and a sequence number.
    ///
    /// The prefix is truncated to the identifier width; the sequence fills
    /// the remaining bytes, keeping its least significant digits.
    ///
    /// # Examples
    ///
    /// ```
    /// use radio_common::RadioId;
    /// assert_eq!(RadioId::new("PLN", 42).to_string(), "PLN00042");
    /// ```
    #[must_use]
    pub fn new(prefix: &str, sequence: u32) -> Self {
        let mut bytes = [b'0'; RADIO_ID_LEN];
        let prefix = &prefix.as_bytes()[..prefix.len().min(RADIO_ID_LEN)];
        bytes[..prefix.len()].copy_from_slice(prefix);

        let digits = sequence.to_string();
        let room = RADIO_ID_LEN - prefix.len();
        let digits = &digits.as_bytes()[digits.len().saturating_sub(room)..];
        bytes[RADIO_ID_LEN - digits.len()..].copy_from_slice(digits);
        Self(bytes)
    }

    /// Builds an identifier with a random sequence number.
    #[must_use]
    pub fn random(prefix: &str) -> Self {
        Self::new(prefix, OsRng.gen_range(0..100_000))
    }

    /// Wraps raw wire bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; RADIO_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw wire bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; RADIO_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for RadioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        f.write_str(&String::from_utf8_lossy(&self.0[..end]))
    }
}

impl fmt::Debug for RadioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RadioId({self})")
    }
}

/// Position snapshot, copied by value into every message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Coordinates {
    /// East-west position.
    pub x: i32,
    /// North-south position.
    pub y: i32,
    /// Altitude. Not carried by legacy frames.
    pub z: i32,
}

impl Coordinates {
    /// Creates a position snapshot.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Radio options a peer applies to every connection it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioConfig {
    /// Ask for an encrypted link.
    pub ciphered: bool,
    /// Refuse the extended protocol and stay on legacy framing.
    pub legacy: bool,
    /// Requested RSA modulus length in bits.
    pub key_length: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            ciphered: true,
            legacy: false,
            key_length: crate::crypto::DEFAULT_KEY_BITS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_for_every_type() {
        for kind in MessageType::ALL {
            assert_eq!(MessageType::from_tag(kind.tag()), Some(kind));
        }
    }

    #[test]
    fn tags_are_pinned() {
        assert_eq!(MessageType::Hello.tag(), 0);
        assert_eq!(MessageType::SendRsa.tag(), 3);
        assert_eq!(MessageType::LandingRequest.tag(), 9);
        assert_eq!(MessageType::from_tag(10), None);
        assert_eq!(MessageType::from_tag(-1), None);
    }

    #[test]
    fn mayday_outranks_routine_traffic() {
        for kind in MessageType::ALL {
            if kind != MessageType::Mayday {
                assert!(MessageType::Mayday.default_priority() > kind.default_priority());
            }
        }
        assert_eq!(MessageType::Bye.default_priority(), 4);
        assert_eq!(MessageType::Keepalive.default_priority(), 3);
    }

    #[test]
    fn radio_id_pads_sequence() {
        assert_eq!(RadioId::new("PLN", 7).to_string(), "PLN00007");
        assert_eq!(RadioId::new("TWR", 12345).as_bytes(), b"TWR12345");
    }

    #[test]
    fn radio_id_keeps_low_digits_when_sequence_overflows() {
        assert_eq!(RadioId::new("PLN", 1_234_567).to_string(), "PLN34567");
    }

    #[test]
    fn radio_id_truncates_long_prefix() {
        assert_eq!(RadioId::new("ABCDEFGHIJ", 1).to_string(), "ABCDEFGH");
    }

    #[test]
    fn radio_id_display_trims_nul_padding() {
        let id = RadioId::from_bytes(*b"LEG\0\0\0\0\0");
        assert_eq!(id.to_string(), "LEG");
    }

    #[test]
    fn random_ids_keep_prefix() {
        let id = RadioId::random("PLN");
        assert!(id.to_string().starts_with("PLN"));
        assert_eq!(id.to_string().len(), RADIO_ID_LEN);
    }
}
