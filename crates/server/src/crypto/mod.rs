//! Symmetric primitives protecting the credential store at rest.
//!
//! # Sealed blob format
//!
//! ```text
//! v1.<base64url-no-pad(nonce)>.<base64url-no-pad(ciphertext+tag)>
//! ```
//!
//! Keys are derived from passwords with PBKDF2-HMAC-SHA256 and never written
//! anywhere.

pub mod cipher;
pub mod kdf;

pub use kdf::Password;
