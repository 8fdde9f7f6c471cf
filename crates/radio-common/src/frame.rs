//! Radio frame serialization and parsing.
//!
//! Every frame starts with the same 28-byte big-endian header:
//!
//! ```text
//! id[8] | length:i32 | priority:i32 | x:i32 | y:i32 | type:i32
//! ```
//!
//! `length` counts the bytes after the header. What follows depends on the
//! protocol spoken on the link:
//!
//! - **Legacy**: a fixed payload implied by the type. HELLO carries one flag
//!   byte, SENDRSA carries `keySize:i32 | modLen:i32 | modulus | expLen:i32 |
//!   exponent`, every other type carries nothing.
//! - **Extended**: a body that is either plain or sealed with the session
//!   key (see [`crate::cipher`]). The plain body is `z:i32` followed by a
//!   self-describing payload, so DATA bytes, MAYDAY reasons and wrapped
//!   session keys survive the trip.

use crate::cipher::{self, CipherError, SessionKey, SEAL_OVERHEAD};
use crate::crypto::PublicKey;
use crate::message::{Message, Payload};
use crate::types::{Coordinates, MessageType, RadioId, RADIO_ID_LEN};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Size of the common frame header.
pub const HEADER_LEN: usize = RADIO_ID_LEN + 5 * 4;

/// Largest body a frame may declare.
pub const MAX_BODY: usize = 65_535;

/// Largest modulus or exponent accepted inside a SENDRSA payload.
const MAX_KEY_FIELD: usize = 1024;

const FLAG_CIPHERED: u8 = 0b01;
const FLAG_EXTENDED: u8 = 0b10;

/// Errors that can occur while reading or writing frames.
///
/// Every variant is fatal to the connection that produced it.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Socket read or write failed.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// The type field holds no known tag.
    #[error("unknown message type tag {0}")]
    UnknownType(i32),
    /// The declared length is negative or exceeds [`MAX_BODY`].
    #[error("invalid declared length {0}")]
    InvalidLength(i32),
    /// A legacy frame declares a length its type does not imply.
    #[error("{kind} frame declares {declared} payload bytes, type implies {implied}")]
    LengthMismatch {
        /// Type of the offending frame.
        kind: MessageType,
        /// Length from the header.
        declared: usize,
        /// Length the type implies. A lower bound when the payload runs past
        /// the declared length.
        implied: usize,
    },
    /// The stream ended in the middle of a frame.
    #[error("stream ended inside a frame ({0} bytes buffered)")]
    Truncated(usize),
    /// An extended body does not parse as its type's payload.
    #[error("malformed {kind} body: {reason}")]
    Malformed {
        /// Type of the offending frame.
        kind: MessageType,
        /// What was wrong.
        reason: &'static str,
    },
    /// A message is too large to encode.
    #[error("{0}-byte body exceeds frame limit")]
    TooLarge(usize),
    /// A sealed body failed to open.
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// The fixed part of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sender id.
    pub id: RadioId,
    /// Bytes following the header.
    pub length: i32,
    /// Message priority.
    pub priority: i32,
    /// Sender x position.
    pub x: i32,
    /// Sender y position.
    pub y: i32,
    /// Wire tag of the message type.
    pub tag: i32,
}

impl Header {
    fn for_message(msg: &Message, body_len: usize) -> Result<Self, FrameError> {
        if body_len > MAX_BODY {
            return Err(FrameError::TooLarge(body_len));
        }
        Ok(Self {
            id: msg.id,
            length: i32::try_from(body_len).map_err(|_| FrameError::TooLarge(body_len))?,
            priority: msg.priority,
            x: msg.position.x,
            y: msg.position.y,
            tag: msg.kind().tag(),
        })
    }

    /// Serializes the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_slice(self.id.as_bytes());
        buf.put_i32(self.length);
        buf.put_i32(self.priority);
        buf.put_i32(self.x);
        buf.put_i32(self.y);
        buf.put_i32(self.tag);
        out
    }

    /// Parses a header from exactly [`HEADER_LEN`] bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        let mut buf = &bytes[..];
        let mut id = [0u8; RADIO_ID_LEN];
        buf.copy_to_slice(&mut id);
        Self {
            id: RadioId::from_bytes(id),
            length: buf.get_i32(),
            priority: buf.get_i32(),
            x: buf.get_i32(),
            y: buf.get_i32(),
            tag: buf.get_i32(),
        }
    }

    /// Resolves the type tag.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UnknownType`] for tags outside the catalog.
    pub fn kind(&self) -> Result<MessageType, FrameError> {
        MessageType::from_tag(self.tag).ok_or(FrameError::UnknownType(self.tag))
    }

    /// Validated body length.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidLength`] for negative or oversized values.
    pub fn body_len(&self) -> Result<usize, FrameError> {
        usize::try_from(self.length)
            .ok()
            .filter(|len| *len <= MAX_BODY)
            .ok_or(FrameError::InvalidLength(self.length))
    }
}

/// Splits one complete frame off `src`, or returns `None` if more bytes are
/// needed. Header fields are validated before the body arrives.
fn split_frame(src: &mut BytesMut) -> Result<Option<(Header, BytesMut)>, FrameError> {
    if src.len() < HEADER_LEN {
        return Ok(None);
    }
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&src[..HEADER_LEN]);
    let header = Header::from_bytes(&raw);
    header.kind()?;
    let body_len = header.body_len()?;

    if src.len() < HEADER_LEN + body_len {
        src.reserve(HEADER_LEN + body_len - src.len());
        return Ok(None);
    }
    src.advance(HEADER_LEN);
    Ok(Some((header, src.split_to(body_len))))
}

fn flags(ciphered: bool, extended: bool) -> u8 {
    let mut f = 0;
    if ciphered {
        f |= FLAG_CIPHERED;
    }
    if extended {
        f |= FLAG_EXTENDED;
    }
    f
}

fn hello(f: u8) -> Payload {
    Payload::Hello {
        ciphered: f & FLAG_CIPHERED != 0,
        extended: f & FLAG_EXTENDED != 0,
    }
}

fn len_i32(len: usize) -> Result<i32, FrameError> {
    i32::try_from(len).map_err(|_| FrameError::TooLarge(len))
}

fn len_u32(len: usize) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_| FrameError::TooLarge(len))
}

/// Bounds-checked reader over a frame body. `None` means the body ended
/// early or a length field was out of range.
struct Body<'a> {
    buf: &'a [u8],
    read: usize,
}

impl<'a> Body<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, read: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() < n {
            return None;
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        self.read += n;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|mut b| b.get_u16())
    }

    fn i32(&mut self) -> Option<i32> {
        self.take(4).map(|mut b| b.get_i32())
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|mut b| b.get_u32())
    }

    /// Length-prefixed field with an `i32` prefix (legacy layout).
    fn field_i32(&mut self, max: usize) -> Option<&'a [u8]> {
        let len = usize::try_from(self.i32()?).ok().filter(|l| *l <= max)?;
        self.take(len)
    }

    /// Length-prefixed field with a `u32` prefix (extended layout).
    fn field_u32(&mut self, max: usize) -> Option<&'a [u8]> {
        let len = usize::try_from(self.u32()?).ok().filter(|l| *l <= max)?;
        self.take(len)
    }

    const fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Legacy
// ---------------------------------------------------------------------------

fn legacy_payload(payload: &Payload) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    match payload {
        Payload::Hello { ciphered, extended } => out.put_u8(flags(*ciphered, *extended)),
        Payload::SendRsa { key, .. } => {
            let modulus = key.modulus_bytes();
            let exponent = key.exponent_bytes();
            out.put_i32(len_i32(key.bits)?);
            out.put_i32(len_i32(modulus.len())?);
            out.put_slice(&modulus);
            out.put_i32(len_i32(exponent.len())?);
            out.put_slice(&exponent);
        }
        // The legacy layout has no room for these fields.
        Payload::Data(_)
        | Payload::Mayday { .. }
        | Payload::Choke
        | Payload::Unchoke
        | Payload::Bye
        | Payload::Routing
        | Payload::Keepalive
        | Payload::LandingRequest => {}
    }
    Ok(out)
}

/// Appends `msg` to `dst` in legacy framing.
///
/// The altitude, DATA bytes, MAYDAY reason and any wrapped session key are
/// not representable and are dropped.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload cannot be framed.
pub fn encode_legacy(msg: &Message, dst: &mut BytesMut) -> Result<(), FrameError> {
    let payload = legacy_payload(&msg.payload)?;
    let header = Header::for_message(msg, payload.len())?;
    dst.reserve(HEADER_LEN + payload.len());
    dst.put_slice(&header.to_bytes());
    dst.put_slice(&payload);
    Ok(())
}

fn parse_legacy(kind: MessageType, body: &[u8]) -> Result<Payload, FrameError> {
    let mut r = Body::new(body);
    let payload = match kind {
        MessageType::Hello => r.u8().map(hello),
        MessageType::SendRsa => (|| {
            let bits = usize::try_from(r.i32()?).ok()?;
            let modulus = r.field_i32(MAX_KEY_FIELD)?;
            let exponent = r.field_i32(MAX_KEY_FIELD)?;
            Some(Payload::SendRsa {
                key: PublicKey::from_be_bytes(bits, modulus, exponent),
                sealed_key: None,
            })
        })(),
        MessageType::Data => Some(Payload::Data(Vec::new())),
        MessageType::Mayday => Some(Payload::Mayday {
            reason: String::new(),
        }),
        MessageType::Choke
        | MessageType::Unchoke
        | MessageType::Bye
        | MessageType::Routing
        | MessageType::Keepalive
        | MessageType::LandingRequest => Payload::bare(kind),
    };
    match payload {
        Some(payload) if r.is_empty() => Ok(payload),
        Some(_) => Err(FrameError::LengthMismatch {
            kind,
            declared: body.len(),
            implied: r.read,
        }),
        None => Err(FrameError::LengthMismatch {
            kind,
            declared: body.len(),
            implied: body.len() + 1,
        }),
    }
}

/// Decodes one legacy frame from the front of `src`.
///
/// Returns `Ok(None)` until a whole frame is buffered. A decoded legacy
/// message always has `z = 0`.
///
/// # Errors
///
/// Returns [`FrameError`] for unknown tags, bad lengths and payloads that
/// disagree with their declared length.
pub fn decode_legacy(src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
    let Some((header, body)) = split_frame(src)? else {
        return Ok(None);
    };
    let kind = header.kind()?;
    let payload = parse_legacy(kind, &body)?;
    Ok(Some(Message {
        id: header.id,
        priority: header.priority,
        position: Coordinates::new(header.x, header.y, 0),
        payload,
    }))
}

// ---------------------------------------------------------------------------
// Extended
// ---------------------------------------------------------------------------

/// Body transform of an extended link.
#[derive(Debug, Clone, Default)]
pub enum Transform {
    /// Bodies travel as-is.
    #[default]
    Plain,
    /// Bodies are sealed with the connection's session key.
    Sealed(SessionKey),
}

impl Transform {
    /// Whether bodies are encrypted.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        matches!(self, Self::Sealed(_))
    }
}

fn extended_body(msg: &Message) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(8);
    out.put_i32(msg.position.z);
    match &msg.payload {
        Payload::Hello { ciphered, extended } => out.put_u8(flags(*ciphered, *extended)),
        Payload::Data(bytes) => {
            out.put_u32(len_u32(bytes.len())?);
            out.put_slice(bytes);
        }
        Payload::Mayday { reason } => {
            let len = u16::try_from(reason.len()).map_err(|_| FrameError::TooLarge(reason.len()))?;
            out.put_u16(len);
            out.put_slice(reason.as_bytes());
        }
        Payload::SendRsa { key, sealed_key } => {
            let modulus = key.modulus_bytes();
            let exponent = key.exponent_bytes();
            let sealed = sealed_key.as_deref().unwrap_or_default();
            out.put_i32(len_i32(key.bits)?);
            out.put_u32(len_u32(modulus.len())?);
            out.put_slice(&modulus);
            out.put_u32(len_u32(exponent.len())?);
            out.put_slice(&exponent);
            out.put_u32(len_u32(sealed.len())?);
            out.put_slice(sealed);
        }
        Payload::Choke
        | Payload::Unchoke
        | Payload::Bye
        | Payload::Routing
        | Payload::Keepalive
        | Payload::LandingRequest => {}
    }
    Ok(out)
}

/// Body length `msg` occupies on a link with the given framing, checked
/// against [`MAX_BODY`] without encoding the header.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the message cannot be framed on
/// that link.
pub fn framed_body_len(
    msg: &Message,
    extended: bool,
    sealed: bool,
) -> Result<usize, FrameError> {
    let len = match (extended, sealed) {
        (false, _) => legacy_payload(&msg.payload)?.len(),
        (true, false) => extended_body(msg)?.len(),
        (true, true) => extended_body(msg)?.len() + SEAL_OVERHEAD,
    };
    if len > MAX_BODY {
        return Err(FrameError::TooLarge(len));
    }
    Ok(len)
}

/// Appends `msg` to `dst` in extended framing under `transform`.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the body exceeds [`MAX_BODY`] and
/// [`FrameError::Cipher`] if sealing fails.
pub fn encode_extended(
    msg: &Message,
    transform: &Transform,
    dst: &mut BytesMut,
) -> Result<(), FrameError> {
    let plain = extended_body(msg)?;
    let (header, body) = match transform {
        Transform::Plain => (Header::for_message(msg, plain.len())?, plain),
        Transform::Sealed(key) => {
            let header = Header::for_message(msg, plain.len() + SEAL_OVERHEAD)?;
            let sealed = cipher::seal(key, &header.to_bytes(), &plain)?;
            (header, sealed)
        }
    };
    dst.reserve(HEADER_LEN + body.len());
    dst.put_slice(&header.to_bytes());
    dst.put_slice(&body);
    Ok(())
}

fn parse_extended(kind: MessageType, body: &[u8]) -> Result<(i32, Payload), FrameError> {
    let malformed = |reason| FrameError::Malformed { kind, reason };
    let mut r = Body::new(body);
    let z = r.i32().ok_or_else(|| malformed("missing altitude"))?;
    let payload = match kind {
        MessageType::Hello => r.u8().map(hello),
        MessageType::Data => r.field_u32(MAX_BODY).map(|b| Payload::Data(b.to_vec())),
        MessageType::Mayday => {
            let reason = r
                .u16()
                .and_then(|len| r.take(usize::from(len)))
                .ok_or_else(|| malformed("truncated reason"))?;
            let reason = std::str::from_utf8(reason).map_err(|_| malformed("reason is not utf-8"))?;
            Some(Payload::Mayday {
                reason: reason.to_owned(),
            })
        }
        MessageType::SendRsa => (|| {
            let bits = usize::try_from(r.i32()?).ok()?;
            let modulus = r.field_u32(MAX_KEY_FIELD)?;
            let exponent = r.field_u32(MAX_KEY_FIELD)?;
            let sealed = r.field_u32(MAX_KEY_FIELD)?;
            Some(Payload::SendRsa {
                key: PublicKey::from_be_bytes(bits, modulus, exponent),
                sealed_key: (!sealed.is_empty()).then(|| sealed.to_vec()),
            })
        })(),
        MessageType::Choke
        | MessageType::Unchoke
        | MessageType::Bye
        | MessageType::Routing
        | MessageType::Keepalive
        | MessageType::LandingRequest => Payload::bare(kind),
    };
    let payload = payload.ok_or_else(|| malformed("truncated payload"))?;
    if !r.is_empty() {
        return Err(malformed("trailing bytes"));
    }
    Ok((z, payload))
}

/// Decodes one extended frame from the front of `src` under `transform`.
///
/// # Errors
///
/// Returns [`FrameError`] for unknown tags, bad lengths, bodies that fail
/// authentication and bodies that do not parse exactly.
pub fn decode_extended(
    src: &mut BytesMut,
    transform: &Transform,
) -> Result<Option<Message>, FrameError> {
    let Some((header, body)) = split_frame(src)? else {
        return Ok(None);
    };
    let kind = header.kind()?;
    let (z, payload) = match transform {
        Transform::Plain => parse_extended(kind, &body)?,
        Transform::Sealed(key) => {
            let plain = cipher::open(key, &header.to_bytes(), &body)?;
            parse_extended(kind, &plain)?
        }
    };
    Ok(Some(Message {
        id: header.id,
        priority: header.priority,
        position: Coordinates::new(header.x, header.y, z),
        payload,
    }))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_position() -> impl Strategy<Value = Coordinates> {
        (any::<i32>(), any::<i32>(), any::<i32>()).prop_map(|(x, y, z)| Coordinates::new(x, y, z))
    }

    fn arb_payload() -> impl Strategy<Value = Payload> {
        prop_oneof![
            (any::<bool>(), any::<bool>())
                .prop_map(|(ciphered, extended)| Payload::Hello { ciphered, extended }),
            prop::collection::vec(any::<u8>(), 0..512).prop_map(Payload::Data),
            "[a-z ]{0,40}".prop_map(|reason| Payload::Mayday { reason }),
            Just(Payload::Choke),
            Just(Payload::Keepalive),
        ]
    }

    proptest! {
        #[test]
        fn extended_decode_inverts_encode(
            seq in 0u32..100_000,
            priority in any::<i32>(),
            position in arb_position(),
            payload in arb_payload(),
        ) {
            let msg = Message::new(RadioId::new("PLN", seq), position, payload)
                .with_priority(priority);
            let mut buf = BytesMut::new();
            encode_extended(&msg, &Transform::Plain, &mut buf).unwrap();
            let out = decode_extended(&mut buf, &Transform::Plain).unwrap().unwrap();
            prop_assert_eq!(out, msg);
        }

        #[test]
        fn decoders_never_panic_on_garbage(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut legacy = BytesMut::from(&data[..]);
            let _ = decode_legacy(&mut legacy);
            let mut extended = BytesMut::from(&data[..]);
            let _ = decode_extended(&mut extended, &Transform::Plain);
        }
    }
}
