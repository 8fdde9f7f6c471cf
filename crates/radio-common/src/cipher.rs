//! Symmetric frame sealing for ciphered extended links.
//!
//! Frame bodies are sealed with XChaCha20-Poly1305. Every sealed body is
//! `nonce[24] || ciphertext || tag[16]`; the frame header is bound in as
//! associated data so it cannot be rewritten in transit.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Session key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// XChaCha20 nonce length in bytes.
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Bytes a sealed body adds on top of the plaintext.
pub const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Failure to seal or open a frame body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Sealed body is shorter than nonce plus tag.
    #[error("sealed body too short: {0} bytes")]
    TooShort(usize),
    /// Authentication failed: wrong key, tampered header or body.
    #[error("frame authentication failed")]
    Authentication,
    /// Session key material has the wrong length.
    #[error("session key must be {SESSION_KEY_LEN} bytes, got {0}")]
    KeyLength(usize),
}

/// Shared symmetric key for one connection. Wiped on drop.
#[derive(Clone)]
pub struct SessionKey(Zeroizing<[u8; SESSION_KEY_LEN]>);

impl SessionKey {
    /// Draws a fresh key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; SESSION_KEY_LEN]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    /// Wraps key material received from a peer.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::KeyLength`] unless `bytes` is exactly
    /// [`SESSION_KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        let arr: [u8; SESSION_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CipherError::KeyLength(bytes.len()))?;
        Ok(Self(Zeroizing::new(arr)))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

/// Seals `plain` under `key`, binding `aad`.
///
/// # Errors
///
/// Returns [`CipherError::Authentication`] if the AEAD backend refuses the
/// input, which only happens for inputs beyond its length limit.
pub fn seal(key: &SessionKey, aad: &[u8], plain: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plain, aad })
        .map_err(|_| CipherError::Authentication)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens a body produced by [`seal`].
///
/// # Errors
///
/// Returns [`CipherError::TooShort`] for bodies that cannot hold a nonce and
/// tag, and [`CipherError::Authentication`] when verification fails.
pub fn open(key: &SessionKey, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CipherError::TooShort(sealed.len()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CipherError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let key = SessionKey::generate();
        let sealed = seal(&key, b"header", b"position report").unwrap();
        assert_eq!(sealed.len(), b"position report".len() + SEAL_OVERHEAD);
        assert_eq!(open(&key, b"header", &sealed).unwrap(), b"position report");
    }

    #[test]
    fn tampered_aad_is_rejected() {
        let key = SessionKey::generate();
        let sealed = seal(&key, b"header", b"x").unwrap();
        assert_eq!(
            open(&key, b"HEADER", &sealed),
            Err(CipherError::Authentication)
        );
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sealed = seal(&SessionKey::generate(), b"", b"x").unwrap();
        assert_eq!(
            open(&SessionKey::generate(), b"", &sealed),
            Err(CipherError::Authentication)
        );
    }

    #[test]
    fn short_body_is_rejected() {
        let key = SessionKey::generate();
        assert_eq!(open(&key, b"", &[0u8; 39]), Err(CipherError::TooShort(39)));
    }

    #[test]
    fn nonces_differ_between_seals() {
        let key = SessionKey::generate();
        let a = seal(&key, b"", b"same").unwrap();
        let b = seal(&key, b"", b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn session_key_length_is_checked() {
        assert_eq!(
            SessionKey::from_slice(&[1u8; 16]).unwrap_err(),
            CipherError::KeyLength(16)
        );
        let key = SessionKey::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32]);
        assert_eq!(format!("{key:?}"), "SessionKey(..)");
    }
}
