//! Stream codec that frames [`Message`]s over a byte stream.
//!
//! A [`RadioCodec`] starts on the legacy protocol and can be upgraded in
//! place, never downgraded: first to the extended protocol, then (on
//! extended links only) to sealed bodies. Callers swap the read and write
//! halves together, after flushing, so no frame is ever read or written with
//! the wrong transform.

use crate::cipher::SessionKey;
use crate::frame::{self, FrameError, Transform};
use crate::message::Message;
use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Protocol a codec currently speaks.
#[derive(Debug, Clone, Default)]
pub enum Protocol {
    /// Fixed legacy frames.
    #[default]
    Legacy,
    /// Extended frames with the given body transform.
    Extended(Transform),
}

/// A codec state change that is not allowed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpgradeError {
    /// The codec already speaks the extended protocol.
    #[error("codec already upgraded")]
    AlreadyUpgraded,
    /// Sealing needs the extended protocol.
    #[error("cannot seal a legacy codec")]
    NotExtended,
    /// The codec already seals its bodies.
    #[error("codec already sealed")]
    AlreadySealed,
}

/// Encoder and decoder for radio frames.
#[derive(Debug, Clone, Default)]
pub struct RadioCodec {
    protocol: Protocol,
}

impl RadioCodec {
    /// A codec speaking the legacy protocol.
    #[must_use]
    pub fn legacy() -> Self {
        Self::default()
    }

    /// A codec that starts on plain extended frames.
    #[must_use]
    pub fn extended() -> Self {
        Self {
            protocol: Protocol::Extended(Transform::Plain),
        }
    }

    /// Current protocol.
    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Whether the extended protocol is active.
    #[must_use]
    pub const fn is_extended(&self) -> bool {
        matches!(self.protocol, Protocol::Extended(_))
    }

    /// Whether bodies are sealed.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        matches!(self.protocol, Protocol::Extended(Transform::Sealed(_)))
    }

    /// Switches from legacy to extended framing.
    ///
    /// # Errors
    ///
    /// Returns [`UpgradeError::AlreadyUpgraded`] if already extended.
    pub fn upgrade(&mut self) -> Result<(), UpgradeError> {
        match self.protocol {
            Protocol::Legacy => {
                self.protocol = Protocol::Extended(Transform::Plain);
                Ok(())
            }
            Protocol::Extended(_) => Err(UpgradeError::AlreadyUpgraded),
        }
    }

    /// Starts sealing every body with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`UpgradeError::NotExtended`] on a legacy codec and
    /// [`UpgradeError::AlreadySealed`] if a key is already installed.
    pub fn seal(&mut self, key: SessionKey) -> Result<(), UpgradeError> {
        match &self.protocol {
            Protocol::Legacy => Err(UpgradeError::NotExtended),
            Protocol::Extended(Transform::Sealed(_)) => Err(UpgradeError::AlreadySealed),
            Protocol::Extended(Transform::Plain) => {
                self.protocol = Protocol::Extended(Transform::Sealed(key));
                Ok(())
            }
        }
    }
}

impl Decoder for RadioCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match &self.protocol {
            Protocol::Legacy => frame::decode_legacy(src),
            Protocol::Extended(transform) => frame::decode_extended(src, transform),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match self.decode(buf)? {
            Some(msg) => Ok(Some(msg)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::Truncated(buf.len())),
        }
    }
}

impl Encoder<Message> for RadioCodec {
    type Error = FrameError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        match &self.protocol {
            Protocol::Legacy => frame::encode_legacy(&msg, dst),
            Protocol::Extended(transform) => frame::encode_extended(&msg, transform, dst),
        }
    }
}
