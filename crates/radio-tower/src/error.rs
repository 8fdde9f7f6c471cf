use radio_common::crypto::CryptoError;
use radio_common::handshake::HandshakeError;
use radio_common::{FrameError, QueueError, RadioId};
use thiserror::Error;

/// Errors that can occur during tower operation.
///
/// Everything except [`TowerError::Io`] on the listener is scoped to a
/// single connection.
#[derive(Error, Debug)]
pub enum TowerError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The HELLO exchange, codec upgrade or key exchange failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// The handshake did not finish in time.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// Another live connection already holds this id.
    #[error("radio id {0} is already registered")]
    RegistrationConflict(RadioId),
    /// No registered connection has this id.
    #[error("no registered peer {0}")]
    UnknownPeer(RadioId),
    /// Frame encoding or decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    /// A queue refused the message.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    /// Key generation or key file failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
