//! Shared error taxonomy and response types for the `localserve` crates.

pub mod error;
pub mod protocol;

pub use error::{BootstrapError, CredentialLayer};
