//! AES-256-GCM-SIV sealing of credential store layers.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant,
//! so a repeated random nonce across rewrites of the same store does not leak
//! key material.
//!
//! Every sealed blob carries associated data naming what it protects (the
//! store format tag, or an entry's alias). A blob moved to another context
//! fails authentication instead of decrypting.

use aes_gcm_siv::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    Aes256GcmSiv, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Prefix that appears at the start of every sealed blob.
pub const VERSION_PREFIX: &str = "v1";

/// A parsed, sealed blob.
///
/// The string representation is `v1.<base64url(nonce)>.<base64url(ciphertext+tag)>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    /// Raw nonce bytes.
    pub nonce: [u8; NONCE_LEN],
    /// Raw ciphertext + authentication tag bytes.
    pub ciphertext: Vec<u8>,
}

impl SealedBlob {
    /// Encode this value to its canonical string representation.
    pub fn to_string_repr(&self) -> String {
        format!(
            "{}.{}.{}",
            VERSION_PREFIX,
            URL_SAFE_NO_PAD.encode(self.nonce),
            URL_SAFE_NO_PAD.encode(&self.ciphertext),
        )
    }

    /// Parse a sealed blob string back into a [`SealedBlob`].
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidFormat`] if the string does not match the
    /// expected `v1.<nonce>.<ciphertext>` structure.
    pub fn parse(s: &str) -> Result<Self, CipherError> {
        let parts: Vec<&str> = s.splitn(3, '.').collect();
        if parts.len() != 3 || parts[0] != VERSION_PREFIX {
            return Err(CipherError::InvalidFormat);
        }
        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|_| CipherError::InvalidFormat)?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| CipherError::InvalidFormat)?;

        let ciphertext = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|_| CipherError::InvalidFormat)?;

        Ok(Self { nonce, ciphertext })
    }
}

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// Sealing failed, or opening failed authentication (wrong key, wrong
    /// associated data, or tampered bytes).
    #[error("aead operation failed")]
    AeadFailure,

    /// The sealed blob string does not match the expected format.
    #[error("invalid sealed blob format")]
    InvalidFormat,
}

/// Seal `plaintext` under `key`, binding `aad` into the authentication tag.
///
/// A random 96-bit nonce is generated per call via the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
pub fn seal(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<SealedBlob, CipherError> {
    let cipher = build_cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CipherError::AeadFailure)?;

    Ok(SealedBlob {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Open a [`SealedBlob`] produced by [`seal`] with the same key and `aad`.
///
/// # Errors
///
/// Returns [`CipherError::AeadFailure`] if authentication fails.
pub fn open(blob: &SealedBlob, key: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;
    let nonce = Nonce::from_slice(&blob.nonce);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: blob.ciphertext.as_ref(),
                aad,
            },
        )
        .map_err(|_| CipherError::AeadFailure)
}

fn build_cipher(key: &[u8]) -> Result<Aes256GcmSiv, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256GcmSiv::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)
}
