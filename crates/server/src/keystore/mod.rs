//! Password-protected credential store for TLS identities.
//!
//! # Layers
//!
//! 1. The store password seals the whole entry table.
//! 2. Each entry password seals that alias' private key, with the alias bound
//!    in as associated data.
//!
//! The two passwords are independent; using the same value for both is the
//! caller's choice.
//!
//! # Invariants
//!
//! - A store that exists but does not open is never overwritten.
//! - Files are replaced by rename, so a crash mid-write leaves either the old
//!   store or the new one.
//! - Read-modify-write of one path is serialized within the process by
//!   [`StoreLock`].

pub mod format;
pub mod lock;
pub mod store;

pub use lock::StoreLock;
pub use store::{CredentialStore, CredentialStoreFile};
