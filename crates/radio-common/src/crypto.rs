//! RSA key material for the radio handshake.
//!
//! Each peer owns one lazily generated key pair. Planes send their public
//! key in SENDRSA; on extended links the tower answers with its own key and
//! a session key wrapped under the plane's key. Legacy towers publish their
//! key out of band in a fixed binary file, see [`read_legacy_key`].

use crate::cipher::{CipherError, SessionKey};
use bytes::{Buf, BufMut};
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Key length used when none is configured or the configured one is invalid.
pub const DEFAULT_KEY_BITS: usize = 1024;

/// Smallest accepted modulus length.
pub const MIN_KEY_BITS: usize = 512;

/// Largest accepted modulus length.
pub const MAX_KEY_BITS: usize = 4096;

/// Upper bound on a length field inside a legacy key file.
const MAX_KEY_FIELD: usize = MAX_KEY_BITS / 8 + 1;

/// Errors from key generation, key files and session key wrapping.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The RSA backend rejected an operation.
    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),
    /// Reading or writing a key file failed.
    #[error("key file i/o: {0}")]
    Io(#[from] std::io::Error),
    /// A key file does not follow the expected layout.
    #[error("malformed key file: {0}")]
    MalformedKeyFile(&'static str),
    /// The background key generation task did not complete.
    #[error("key generation task failed: {0}")]
    KeyGeneration(String),
    /// An unwrapped session key had the wrong shape.
    #[error(transparent)]
    Session(#[from] CipherError),
}

/// RSA public key as carried in SENDRSA frames and legacy key files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Nominal modulus length in bits.
    pub bits: usize,
    /// Modulus `n`.
    pub modulus: BigUint,
    /// Public exponent `e`.
    pub exponent: BigUint,
}

impl PublicKey {
    /// Builds a key from big-endian unsigned byte strings.
    #[must_use]
    pub fn from_be_bytes(bits: usize, modulus: &[u8], exponent: &[u8]) -> Self {
        Self {
            bits,
            modulus: BigUint::from_bytes_be(modulus),
            exponent: BigUint::from_bytes_be(exponent),
        }
    }

    /// Big-endian modulus bytes without leading zeros.
    #[must_use]
    pub fn modulus_bytes(&self) -> Vec<u8> {
        self.modulus.to_bytes_be()
    }

    /// Big-endian exponent bytes without leading zeros.
    #[must_use]
    pub fn exponent_bytes(&self) -> Vec<u8> {
        self.exponent.to_bytes_be()
    }

    /// Converts into a key the RSA backend can encrypt with.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Rsa`] if the modulus or exponent is not a
    /// usable RSA public key.
    pub fn to_rsa(&self) -> Result<RsaPublicKey, CryptoError> {
        Ok(RsaPublicKey::new(self.modulus.clone(), self.exponent.clone())?)
    }
}

impl From<&RsaPublicKey> for PublicKey {
    fn from(key: &RsaPublicKey) -> Self {
        Self {
            bits: key.size() * 8,
            modulus: key.n().clone(),
            exponent: key.e().clone(),
        }
    }
}

/// A peer's RSA key pair.
pub struct KeyPair {
    private: RsaPrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// The shareable half.
    #[must_use]
    pub const fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Modulus length in bits.
    #[must_use]
    pub const fn bits(&self) -> usize {
        self.public.bits
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.public.bits)
            .finish_non_exhaustive()
    }
}

/// Whether `bits` is a key length this crate will generate.
#[must_use]
pub const fn is_valid_key_length(bits: usize) -> bool {
    bits >= MIN_KEY_BITS && bits <= MAX_KEY_BITS && bits % 8 == 0
}

/// Returns `requested` if valid, otherwise logs and returns
/// [`DEFAULT_KEY_BITS`].
#[must_use]
pub fn effective_key_length(requested: usize) -> usize {
    if is_valid_key_length(requested) {
        requested
    } else {
        warn!(
            requested,
            fallback = DEFAULT_KEY_BITS,
            "invalid RSA key length, using default"
        );
        DEFAULT_KEY_BITS
    }
}

/// Generates a fresh key pair. Invalid lengths fall back to
/// [`DEFAULT_KEY_BITS`] instead of failing.
///
/// This is CPU heavy; async callers should go through [`LazyKeyPair`].
///
/// # Errors
///
/// Returns [`CryptoError::Rsa`] if the backend fails to find primes.
pub fn generate_key_pair(bits: usize) -> Result<KeyPair, CryptoError> {
    let bits = effective_key_length(bits);
    let private = RsaPrivateKey::new(&mut OsRng, bits)?;
    let public = PublicKey::from(&private.to_public_key());
    debug!(bits, "generated RSA key pair");
    Ok(KeyPair { private, public })
}

/// A key pair created on first use and kept for the owner's lifetime.
#[derive(Debug)]
pub struct LazyKeyPair {
    bits: usize,
    cell: OnceCell<Arc<KeyPair>>,
}

impl LazyKeyPair {
    /// Defers generation of a `bits`-long key pair until [`Self::get`].
    #[must_use]
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            cell: OnceCell::new(),
        }
    }

    /// Wraps an existing key pair.
    #[must_use]
    pub fn ready(pair: KeyPair) -> Self {
        Self {
            bits: pair.bits(),
            cell: OnceCell::new_with(Some(Arc::new(pair))),
        }
    }

    /// Whether the key pair has been generated yet.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Returns the key pair, generating it on a blocking thread the first
    /// time. Concurrent callers wait for the same generation.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if generation fails. A later call retries.
    pub async fn get(&self) -> Result<Arc<KeyPair>, CryptoError> {
        let bits = self.bits;
        self.cell
            .get_or_try_init(|| async move {
                let pair = tokio::task::spawn_blocking(move || generate_key_pair(bits))
                    .await
                    .map_err(|e| CryptoError::KeyGeneration(e.to_string()))??;
                Ok::<_, CryptoError>(Arc::new(pair))
            })
            .await
            .cloned()
    }
}

/// Wraps `key` so only the owner of `peer` can recover it.
///
/// # Errors
///
/// Returns [`CryptoError::Rsa`] if `peer` is not a usable key or is too
/// short to hold a session key.
pub fn seal_session_key(peer: &PublicKey, key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    let rsa = peer.to_rsa()?;
    Ok(rsa.encrypt(&mut OsRng, Pkcs1v15Encrypt, key.as_bytes())?)
}

/// Recovers a session key wrapped by [`seal_session_key`].
///
/// # Errors
///
/// Returns [`CryptoError::Rsa`] if decryption fails and
/// [`CryptoError::Session`] if the recovered key has the wrong length.
pub fn open_session_key(pair: &KeyPair, sealed: &[u8]) -> Result<SessionKey, CryptoError> {
    let bytes = zeroize::Zeroizing::new(pair.private.decrypt(Pkcs1v15Encrypt, sealed)?);
    Ok(SessionKey::from_slice(&bytes)?)
}

fn take_field<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], CryptoError> {
    if buf.remaining() < 4 {
        return Err(CryptoError::MalformedKeyFile("truncated length field"));
    }
    let len = buf.get_i32();
    let len = usize::try_from(len)
        .map_err(|_| CryptoError::MalformedKeyFile("negative length field"))?;
    if len == 0 || len > MAX_KEY_FIELD {
        return Err(CryptoError::MalformedKeyFile("length field out of range"));
    }
    if buf.remaining() < len {
        return Err(CryptoError::MalformedKeyFile("truncated key material"));
    }
    let current: &'a [u8] = *buf;
    let (field, rest) = current.split_at(len);
    *buf = rest;
    Ok(field)
}

/// Parses the legacy key layout:
/// `keyLength:i32 | modLen:i32 | modulus | expLen:i32 | exponent`,
/// all integers big-endian. `keyLength` is ignored.
///
/// # Errors
///
/// Returns [`CryptoError::MalformedKeyFile`] for truncated input, bad
/// length fields or trailing bytes.
pub fn decode_legacy_key(mut data: &[u8]) -> Result<PublicKey, CryptoError> {
    if data.remaining() < 4 {
        return Err(CryptoError::MalformedKeyFile("missing key length"));
    }
    let _ = data.get_i32();
    let modulus = take_field(&mut data)?;
    let exponent = take_field(&mut data)?;
    if data.has_remaining() {
        return Err(CryptoError::MalformedKeyFile("trailing bytes"));
    }
    let modulus = BigUint::from_bytes_be(modulus);
    let bits = usize::try_from(modulus.bits()).unwrap_or(usize::MAX);
    Ok(PublicKey {
        bits,
        modulus,
        exponent: BigUint::from_bytes_be(exponent),
    })
}

/// Serializes `key` in the legacy key layout.
#[must_use]
pub fn encode_legacy_key(key: &PublicKey) -> Vec<u8> {
    let modulus = key.modulus_bytes();
    let exponent = key.exponent_bytes();
    let mut out = Vec::with_capacity(12 + modulus.len() + exponent.len());
    out.put_i32(i32::try_from(key.bits).unwrap_or(i32::MAX));
    out.put_i32(i32::try_from(modulus.len()).unwrap_or(i32::MAX));
    out.put_slice(&modulus);
    out.put_i32(i32::try_from(exponent.len()).unwrap_or(i32::MAX));
    out.put_slice(&exponent);
    out
}

/// Reads a legacy key file.
///
/// # Errors
///
/// Returns [`CryptoError::Io`] if the file cannot be read and
/// [`CryptoError::MalformedKeyFile`] if its content is not a key.
pub fn read_legacy_key(path: &Path) -> Result<PublicKey, CryptoError> {
    let data = std::fs::read(path)?;
    decode_legacy_key(&data)
}

/// Like [`read_legacy_key`] but any failure means "no legacy key".
#[must_use]
pub fn load_legacy_key(path: &Path) -> Option<PublicKey> {
    match read_legacy_key(path) {
        Ok(key) => {
            debug!(path = %path.display(), bits = key.bits, "loaded legacy tower key");
            Some(key)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "legacy tower key unavailable");
            None
        }
    }
}

/// Writes `key` to `path` in the legacy layout.
///
/// # Errors
///
/// Returns [`CryptoError::Io`] if the file cannot be written.
pub fn write_legacy_key(path: &Path, key: &PublicKey) -> Result<(), CryptoError> {
    std::fs::write(path, encode_legacy_key(key))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_length_validation() {
        assert!(is_valid_key_length(512));
        assert!(is_valid_key_length(1024));
        assert!(is_valid_key_length(4096));
        assert!(!is_valid_key_length(0));
        assert!(!is_valid_key_length(511));
        assert!(!is_valid_key_length(1025));
        assert!(!is_valid_key_length(8192));
    }

    #[test]
    fn invalid_length_falls_back_to_default() {
        assert_eq!(effective_key_length(13), DEFAULT_KEY_BITS);
        assert_eq!(effective_key_length(2048), 2048);
    }

    #[test]
    fn generated_key_has_requested_size() {
        let pair = generate_key_pair(512).unwrap();
        assert_eq!(pair.bits(), 512);
        assert_eq!(pair.public().exponent, BigUint::from(65_537u32));
    }

    #[test]
    fn session_key_wraps_and_unwraps() {
        let pair = generate_key_pair(512).unwrap();
        let key = SessionKey::generate();
        let sealed = seal_session_key(pair.public(), &key).unwrap();
        assert_eq!(sealed.len(), 64);
        assert_eq!(open_session_key(&pair, &sealed).unwrap(), key);
    }

    #[test]
    fn session_key_from_other_pair_fails() {
        let ours = generate_key_pair(512).unwrap();
        let theirs = generate_key_pair(512).unwrap();
        let sealed = seal_session_key(theirs.public(), &SessionKey::generate()).unwrap();
        assert!(open_session_key(&ours, &sealed).is_err());
    }

    #[test]
    fn legacy_key_file_round_trip() {
        let modulus = [0xC3, 0x01, 0x7F, 0x00, 0x42];
        let exponent = [0x01, 0x00, 0x01];
        let key = PublicKey::from_be_bytes(40, &modulus, &exponent);

        let dir = std::env::temp_dir().join(format!("radio-key-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tower.key");
        write_legacy_key(&path, &key).unwrap();

        let loaded = read_legacy_key(&path).unwrap();
        assert_eq!(loaded.modulus, BigUint::from_bytes_be(&modulus));
        assert_eq!(loaded.exponent, BigUint::from(65_537u32));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn legacy_key_layout_is_big_endian() {
        let key = PublicKey::from_be_bytes(16, &[0xAB, 0xCD], &[0x03]);
        let bytes = encode_legacy_key(&key);
        assert_eq!(
            bytes,
            vec![0, 0, 0, 16, 0, 0, 0, 2, 0xAB, 0xCD, 0, 0, 0, 1, 0x03]
        );
    }

    #[test]
    fn malformed_key_files_are_rejected() {
        let cases: [&[u8]; 5] = [
            &[],
            &[0, 0, 0, 8],
            &[0, 0, 0, 8, 0xFF, 0xFF, 0xFF, 0xFF],
            &[0, 0, 0, 8, 0, 0, 0, 4, 1, 2],
            &[0, 0, 0, 8, 0, 0, 0, 1, 9, 0, 0, 0, 1, 3, 0xEE],
        ];
        for data in cases {
            assert!(matches!(
                decode_legacy_key(data),
                Err(CryptoError::MalformedKeyFile(_))
            ));
        }
    }

    #[test]
    fn missing_key_file_is_absent() {
        assert!(load_legacy_key(Path::new("/nonexistent/radio/tower.key")).is_none());
    }

    #[tokio::test]
    async fn lazy_key_pair_is_generated_once() {
        let lazy = LazyKeyPair::new(512);
        assert!(!lazy.is_initialized());
        let a = lazy.get().await.unwrap();
        let b = lazy.get().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(lazy.is_initialized());
    }

    #[tokio::test]
    async fn lazy_key_pair_with_invalid_length_uses_default() {
        let lazy = LazyKeyPair::new(100);
        assert_eq!(lazy.get().await.unwrap().bits(), DEFAULT_KEY_BITS);
    }
}
