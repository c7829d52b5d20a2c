//! TLS server identities: key pair + self-signed certificate under an alias.
//!
//! [`KeyMaterialGenerator`] builds a fresh [`Identity`] from an
//! [`IdentityRequest`]; the keystore persists it and the TLS factory turns it
//! into a `rustls` server context. Identities live in memory only between
//! generation and persistence.

pub mod generator;

use std::fmt;

use common::BootstrapError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use x509_parser::prelude::{FromDer, X509Certificate};

pub use generator::{resolve_algorithm, KeyMaterialGenerator};

/// Digest used by the certificate signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

/// Asymmetric algorithm of the key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignAlgorithm {
    Ecdsa,
    Ed25519,
    Rsa,
}

/// Hash + signature pairing of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureScheme {
    pub hash: HashAlgorithm,
    pub sign: SignAlgorithm,
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}with{:?}", self.hash, self.sign)
    }
}

/// Parameters for one identity. Validated by the generator before any key
/// material is produced.
#[derive(Debug, Clone)]
pub struct IdentityRequest {
    /// Store alias, also the certificate subject common name.
    pub alias: String,
    pub scheme: SignatureScheme,
    pub key_size_bits: u32,
    pub days_valid: u32,
    /// DNS names and IP literals placed in the subjectAltName extension.
    pub subject_alt_names: Vec<String>,
}

/// A generated or reloaded server identity.
///
/// The certificate is always parsed on construction, so the public key and
/// validity window reported here are those of the certificate itself.
#[derive(Clone)]
pub struct Identity {
    alias: String,
    scheme: SignatureScheme,
    key_size_bits: u32,
    certificate_der: Vec<u8>,
    private_key_der: Vec<u8>,
    public_key_der: Vec<u8>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
}

impl Identity {
    /// Assemble an identity from DER certificate and PKCS#8 private key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Crypto`] if the certificate does not parse.
    pub fn from_parts(
        alias: impl Into<String>,
        scheme: SignatureScheme,
        key_size_bits: u32,
        certificate_der: Vec<u8>,
        private_key_der: Vec<u8>,
    ) -> Result<Self, BootstrapError> {
        let (_, cert) = X509Certificate::from_der(&certificate_der)
            .map_err(|e| BootstrapError::Crypto(format!("certificate does not parse: {e}")))?;

        let public_key_der = cert.public_key().raw.to_vec();
        let validity = cert.validity();
        let not_before = to_datetime(validity.not_before.timestamp())?;
        let not_after = to_datetime(validity.not_after.timestamp())?;

        Ok(Self {
            alias: alias.into(),
            scheme,
            key_size_bits,
            certificate_der,
            private_key_der,
            public_key_der,
            not_before,
            not_after,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn key_size_bits(&self) -> u32 {
        self.key_size_bits
    }

    /// X.509 certificate, DER encoded.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Private key, PKCS#8 DER encoded.
    pub fn private_key_der(&self) -> &[u8] {
        &self.private_key_der
    }

    /// SubjectPublicKeyInfo of the certificate, DER encoded.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        self.private_key_der.iter_mut().for_each(|b| *b = 0);
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("alias", &self.alias)
            .field("scheme", &self.scheme)
            .field("key_size_bits", &self.key_size_bits)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("private_key_der", &"[REDACTED]")
            .finish()
    }
}

fn to_datetime(unix: i64) -> Result<OffsetDateTime, BootstrapError> {
    OffsetDateTime::from_unix_timestamp(unix)
        .map_err(|e| BootstrapError::Crypto(format!("certificate validity out of range: {e}")))
}

/// Source of fresh identities. Implemented by [`KeyMaterialGenerator`].
#[cfg_attr(test, mockall::automock)]
pub trait IdentityGenerator: Send + Sync {
    /// Produce a new identity. Each call uses fresh randomness.
    fn generate(&self, request: &IdentityRequest) -> Result<Identity, BootstrapError>;
}
