//! HELLO negotiation, codec upgrade and RSA key exchange.
//!
//! The initiator (a plane) opens with HELLO carrying the flags it wants. The
//! responder (a tower) answers with HELLO carrying the negotiated flags; both
//! sides apply the same AND-rule so they agree without another round trip.
//!
//! When the extended protocol is negotiated both sides flush and swap their
//! codecs right after the HELLO exchange. When ciphering is negotiated the
//! initiator sends SENDRSA with its public key:
//!
//! - on extended links the responder answers SENDRSA with its own key and a
//!   fresh session key wrapped under the initiator's key, and both sides then
//!   seal every body;
//! - on legacy links there is no room for a wrapped key, so the responder just
//!   records the initiator's key and the initiator reads the tower key from
//!   the legacy key file. Bodies stay in the clear.

use crate::cipher::SessionKey;
use crate::codec::{RadioCodec, UpgradeError};
use crate::crypto::{self, CryptoError, LazyKeyPair, PublicKey};
use crate::frame::FrameError;
use crate::message::{Message, Payload};
use crate::state::{ConnectionState, IllegalTransition, Lifecycle};
use crate::types::{Coordinates, MessageType, RadioConfig, RadioId};
use futures_util::{SinkExt, StreamExt};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

/// Errors that abort a handshake. The connection is closed and the peer is
/// never registered.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Framing or socket failure.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The peer closed the stream mid-handshake.
    #[error("peer closed the connection during handshake")]
    Closed,
    /// A frame arrived out of order.
    #[error("expected {expected}, got {got}")]
    UnexpectedMessage {
        /// What the handshake was waiting for.
        expected: MessageType,
        /// What arrived.
        got: MessageType,
    },
    /// A HELLO that cannot be honoured.
    #[error("malformed HELLO: {0}")]
    MalformedHello(&'static str),
    /// An extended SENDRSA reply without a wrapped session key.
    #[error("SENDRSA reply carries no session key")]
    MissingSessionKey,
    /// The codec refused the requested swap.
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
    /// Bytes framed under the old transform were still pending.
    #[error("{0} bytes still buffered under the previous codec")]
    Undrained(usize),
    /// Key generation or session key unwrapping failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// The connection lifecycle was violated.
    #[error(transparent)]
    Lifecycle(#[from] IllegalTransition),
}

/// How this side introduces itself.
#[derive(Debug, Clone, Copy)]
pub struct Greeting {
    /// Local radio id.
    pub id: RadioId,
    /// Local position at handshake time.
    pub position: Coordinates,
    /// Local radio options.
    pub config: RadioConfig,
}

/// Capabilities both sides agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Ciphering is on.
    pub ciphered: bool,
    /// Extended protocol is on.
    pub extended: bool,
}

/// Applies the AND-rule to the local config and the flags the peer sent.
///
/// # Examples
///
/// ```
/// use radio_common::handshake::{negotiate, Negotiated};
/// use radio_common::RadioConfig;
///
/// let tower = RadioConfig { ciphered: true, legacy: false, key_length: 1024 };
/// assert_eq!(
///     negotiate(&tower, false, true),
///     Negotiated { ciphered: false, extended: true }
/// );
/// ```
#[must_use]
pub const fn negotiate(local: &RadioConfig, peer_ciphered: bool, peer_extended: bool) -> Negotiated {
    Negotiated {
        ciphered: local.ciphered && peer_ciphered,
        extended: !local.legacy && peer_extended,
    }
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone)]
pub struct Session {
    /// Remote radio id.
    pub peer: RadioId,
    /// Remote position from its HELLO.
    pub peer_position: Coordinates,
    /// Agreed capabilities.
    pub negotiated: Negotiated,
    /// Remote RSA key, when one was exchanged or loaded.
    pub peer_key: Option<PublicKey>,
    /// Bodies are sealed in both directions.
    pub sealed: bool,
}

async fn recv<R>(reader: &mut FramedRead<R, RadioCodec>) -> Result<Message, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    match reader.next().await {
        Some(Ok(msg)) => Ok(msg),
        Some(Err(e)) => Err(e.into()),
        None => Err(HandshakeError::Closed),
    }
}

/// Drain-then-swap: flush everything framed under the current codec, then
/// apply `step` to the read and write codecs together.
async fn swap<R, W, F>(
    reader: &mut FramedRead<R, RadioCodec>,
    writer: &mut FramedWrite<W, RadioCodec>,
    step: F,
) -> Result<(), HandshakeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(&mut RadioCodec) -> Result<(), UpgradeError>,
{
    writer.flush().await?;
    let pending = writer.write_buffer().len();
    if pending != 0 {
        return Err(HandshakeError::Undrained(pending));
    }
    step(writer.encoder_mut())?;
    step(reader.decoder_mut())?;
    Ok(())
}

fn unexpected(expected: MessageType, got: &Message) -> HandshakeError {
    HandshakeError::UnexpectedMessage {
        expected,
        got: got.kind(),
    }
}

/// Runs the responder side over an accepted stream.
///
/// # Errors
///
/// Returns [`HandshakeError`] if the peer does not open with HELLO, sends
/// frames out of order, closes early, or any codec or key operation fails.
pub async fn respond<R, W>(
    reader: &mut FramedRead<R, RadioCodec>,
    writer: &mut FramedWrite<W, RadioCodec>,
    local: &Greeting,
    keys: &LazyKeyPair,
    lifecycle: &mut Lifecycle,
) -> Result<Session, HandshakeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    lifecycle.advance(ConnectionState::Handshaking)?;

    let hello = recv(reader).await?;
    let Payload::Hello { ciphered, extended } = hello.payload else {
        return Err(unexpected(MessageType::Hello, &hello));
    };
    let negotiated = negotiate(&local.config, ciphered, extended);
    debug!(
        peer = %hello.id,
        requested_ciphered = ciphered,
        requested_extended = extended,
        ?negotiated,
        "HELLO received"
    );
    writer
        .send(Message::hello(
            local.id,
            local.position,
            negotiated.ciphered,
            negotiated.extended,
        ))
        .await?;

    if negotiated.extended {
        lifecycle.advance(ConnectionState::Upgrading)?;
        swap(reader, writer, RadioCodec::upgrade).await?;
    }

    let mut peer_key = None;
    let mut sealed = false;
    if negotiated.ciphered {
        let msg = recv(reader).await?;
        let Payload::SendRsa { key, .. } = msg.payload else {
            return Err(unexpected(MessageType::SendRsa, &msg));
        };
        if negotiated.extended {
            let ours = keys.get().await?;
            let session = SessionKey::generate();
            let wrapped = crypto::seal_session_key(&key, &session)?;
            writer
                .send(Message::send_rsa(
                    local.id,
                    local.position,
                    ours.public().clone(),
                    Some(wrapped),
                ))
                .await?;
            swap(reader, writer, |codec| codec.seal(session.clone())).await?;
            sealed = true;
        }
        peer_key = Some(key);
    }

    lifecycle.advance(ConnectionState::Active)?;
    info!(
        peer = %hello.id,
        ciphered = negotiated.ciphered,
        extended = negotiated.extended,
        sealed,
        "handshake complete"
    );
    Ok(Session {
        peer: hello.id,
        peer_position: hello.position,
        negotiated,
        peer_key,
        sealed,
    })
}

/// Runs the initiator side over a freshly connected stream.
///
/// `legacy_key_file` is consulted only when ciphering ends up negotiated on a
/// legacy link; a missing or unreadable file is logged and tolerated.
///
/// # Errors
///
/// Returns [`HandshakeError`] if the reply is not HELLO, grants a flag that
/// was not requested, frames arrive out of order, the stream closes early, or
/// any codec or key operation fails.
pub async fn initiate<R, W>(
    reader: &mut FramedRead<R, RadioCodec>,
    writer: &mut FramedWrite<W, RadioCodec>,
    local: &Greeting,
    keys: &LazyKeyPair,
    legacy_key_file: Option<&Path>,
    lifecycle: &mut Lifecycle,
) -> Result<Session, HandshakeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    lifecycle.advance(ConnectionState::Handshaking)?;

    let want_extended = !local.config.legacy;
    writer
        .send(Message::hello(
            local.id,
            local.position,
            local.config.ciphered,
            want_extended,
        ))
        .await?;

    let reply = recv(reader).await?;
    let Payload::Hello { ciphered, extended } = reply.payload else {
        return Err(unexpected(MessageType::Hello, &reply));
    };
    if (ciphered && !local.config.ciphered) || (extended && !want_extended) {
        return Err(HandshakeError::MalformedHello(
            "reply grants a capability that was not requested",
        ));
    }
    let negotiated = negotiate(&local.config, ciphered, extended);
    debug!(peer = %reply.id, ?negotiated, "HELLO reply received");

    if negotiated.extended {
        lifecycle.advance(ConnectionState::Upgrading)?;
        swap(reader, writer, RadioCodec::upgrade).await?;
    }

    let mut peer_key = None;
    let mut sealed = false;
    if negotiated.ciphered {
        let ours = keys.get().await?;
        writer
            .send(Message::send_rsa(
                local.id,
                local.position,
                ours.public().clone(),
                None,
            ))
            .await?;

        if negotiated.extended {
            let msg = recv(reader).await?;
            let Payload::SendRsa { key, sealed_key } = msg.payload else {
                return Err(unexpected(MessageType::SendRsa, &msg));
            };
            let wrapped = sealed_key.ok_or(HandshakeError::MissingSessionKey)?;
            let session = crypto::open_session_key(&ours, &wrapped)?;
            swap(reader, writer, |codec| codec.seal(session.clone())).await?;
            sealed = true;
            peer_key = Some(key);
        } else if let Some(path) = legacy_key_file {
            peer_key = crypto::load_legacy_key(path);
        } else {
            debug!("no legacy tower key file configured");
        }
    }

    lifecycle.advance(ConnectionState::Active)?;
    info!(
        peer = %reply.id,
        ciphered = negotiated.ciphered,
        extended = negotiated.extended,
        sealed,
        "handshake complete"
    );
    Ok(Session {
        peer: reply.id,
        peer_position: reply.position,
        negotiated,
        peer_key,
        sealed,
    })
}
