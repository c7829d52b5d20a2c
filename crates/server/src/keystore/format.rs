//! On-disk layout of a credential store.
//!
//! ```text
//! {
//!   "format": "localserve-keystore",
//!   "version": 1,
//!   "kdf": { "algorithm": "pbkdf2-hmac-sha256", "rounds": 100000, "salt": "<b64>" },
//!   "payload": "v1.<nonce>.<ciphertext>"      // sealed EntryTable JSON
//! }
//! ```
//!
//! Inside the payload every entry seals its private key again, under a key
//! derived from the entry password with its own salt.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::crypto::kdf::{self, SALT_LEN};
use crate::identity::SignatureScheme;

/// Value of [`StoreEnvelope::format`]; also the associated data of the payload.
pub const FORMAT_TAG: &str = "localserve-keystore";

/// Current envelope version.
pub const FORMAT_VERSION: u32 = 1;

/// Outer, plaintext part of the store file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEnvelope {
    pub format: String,
    pub version: u32,
    pub kdf: KdfParams,
    /// Sealed [`EntryTable`] JSON, keyed by the store password.
    pub payload: String,
}

/// Parameters needed to re-derive a key from its password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub rounds: u32,
    pub salt: String,
}

impl KdfParams {
    /// Parameters with a fresh random salt.
    pub fn fresh(rounds: u32) -> Self {
        Self {
            algorithm: kdf::ALGORITHM.into(),
            rounds,
            salt: URL_SAFE_NO_PAD.encode(kdf::random_salt()),
        }
    }

    /// Decode the salt, rejecting parameters this build cannot honour.
    pub fn salt_bytes(&self) -> Result<Vec<u8>, String> {
        if self.algorithm != kdf::ALGORITHM {
            return Err(format!("unsupported key derivation {:?}", self.algorithm));
        }
        if self.rounds < kdf::MIN_ROUNDS {
            return Err(format!(
                "key derivation rounds {} below minimum {}",
                self.rounds,
                kdf::MIN_ROUNDS
            ));
        }
        if self.rounds > kdf::MAX_ROUNDS {
            return Err(format!(
                "key derivation rounds {} above maximum {}",
                self.rounds,
                kdf::MAX_ROUNDS
            ));
        }
        let salt = URL_SAFE_NO_PAD
            .decode(&self.salt)
            .map_err(|e| format!("salt is not base64: {e}"))?;
        if salt.len() != SALT_LEN {
            return Err(format!("salt must be {SALT_LEN} bytes, got {}", salt.len()));
        }
        Ok(salt)
    }
}

/// Decrypted payload: every alias held by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryTable {
    pub entries: BTreeMap<String, StoredEntry>,
}

/// One alias: public material in clear (inside the store layer), private key
/// sealed under the entry password with the alias as associated data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub scheme: SignatureScheme,
    pub key_size_bits: u32,
    /// Base64 DER certificates, leaf first.
    pub certificate_chain: Vec<String>,
    pub kdf: KdfParams,
    /// Sealed PKCS#8 DER private key.
    pub private_key: String,
}

impl StoredEntry {
    /// DER certificates, leaf first.
    pub fn certificate_chain_der(&self) -> Result<Vec<Vec<u8>>, String> {
        if self.certificate_chain.is_empty() {
            return Err("entry has an empty certificate chain".into());
        }
        self.certificate_chain
            .iter()
            .map(|c| {
                URL_SAFE_NO_PAD
                    .decode(c)
                    .map_err(|e| format!("certificate is not base64: {e}"))
            })
            .collect()
    }
}

pub fn encode_der(der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(der)
}
