//! Password handling: the [`Password`] secret wrapper and PBKDF2 key derivation.

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::cipher::KEY_LEN;

/// Salt length for every derived key.
pub const SALT_LEN: usize = 16;

/// Default PBKDF2 iteration count for newly written stores.
pub const DEFAULT_ROUNDS: u32 = 100_000;

/// Lowest iteration count accepted when reading a store from disk.
pub const MIN_ROUNDS: u32 = 1_000;

/// Highest iteration count accepted, so a tampered store cannot stall
/// startup in key derivation.
pub const MAX_ROUNDS: u32 = 10_000_000;

/// Label of the only supported derivation, recorded in the store file.
pub const ALGORITHM: &str = "pbkdf2-hmac-sha256";

/// A password kept out of logs and wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(Vec<u8>);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

/// A derived AES key, zeroed on drop.
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Tag that lets a loaded store recognise its own password later without
    /// keeping the password itself.
    pub fn verifier(&self) -> Vec<u8> {
        verifier_mac(&self.0).finalize().into_bytes().to_vec()
    }

    /// Constant-time check of `tag` against [`DerivedKey::verifier`].
    pub fn matches_verifier(&self, tag: &[u8]) -> bool {
        verifier_mac(&self.0).verify_slice(tag).is_ok()
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

fn verifier_mac(key: &[u8]) -> Hmac<Sha256> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(b"localserve/store-password-verifier");
    mac
}

/// Derive an AES-256 key from `password` and `salt`.
pub fn derive_key(password: &Password, salt: &[u8], rounds: u32) -> DerivedKey {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut key);
    DerivedKey(key)
}

/// Fresh random salt from the OS CSPRNG.
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
