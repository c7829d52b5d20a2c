//! Startup error taxonomy shared across crates.

use std::{fmt, net::IpAddr, path::PathBuf};

use thiserror::Error;

/// Which password-protected layer of a credential store rejected a password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialLayer {
    /// The store-level password protecting the whole container.
    Store,
    /// The entry-level password protecting one alias' private key.
    Entry,
}

impl fmt::Display for CredentialLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialLayer::Store => f.write_str("store"),
            CredentialLayer::Entry => f.write_str("entry"),
        }
    }
}

/// Every way server startup can fail.
///
/// All variants abort startup; there is no partial-service mode. Only
/// [`BootstrapError::Io`] and [`BootstrapError::Bind`] are worth retrying
/// without operator intervention (see [`BootstrapError::is_retriable`]).
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Invalid key generation or connector parameters. Raised before any I/O.
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// The cryptographic provider cannot satisfy the request.
    #[error("crypto provider error: {0}")]
    Crypto(String),

    /// Filesystem failure while reading or writing the credential store.
    #[error("credential store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store exists but cannot be opened: malformed, or wrong store password.
    #[error("credential store {} is corrupt or unreadable: {reason}", path.display())]
    StoreCorrupt { path: PathBuf, reason: String },

    /// A password did not open its layer of the credential store.
    #[error("{layer} password rejected for alias {alias:?}")]
    Authentication { alias: String, layer: CredentialLayer },

    /// The requested alias has no entry in the credential store.
    #[error("alias {alias:?} not found in credential store")]
    AliasNotFound { alias: String },

    /// A connector could not bind its listening socket.
    #[error("failed to bind {address}:{port}: {source}")]
    Bind {
        address: IpAddr,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// A lifecycle operation was invoked in a state that does not allow it.
    #[error("cannot {action} a server that is {state}")]
    InvalidState { state: String, action: &'static str },
}

impl BootstrapError {
    /// Name of the startup stage this error belongs to, for operator reports.
    pub fn stage(&self) -> &'static str {
        match self {
            BootstrapError::Parameter(_) | BootstrapError::Crypto(_) => "key-generation",
            BootstrapError::Io { .. } | BootstrapError::StoreCorrupt { .. } => "credential-store",
            BootstrapError::Authentication { .. } | BootstrapError::AliasNotFound { .. } => {
                "tls-context"
            }
            BootstrapError::Bind { .. } => "bind",
            BootstrapError::InvalidState { .. } => "lifecycle",
        }
    }

    /// Returns `true` when a caller may retry after fixing the environment
    /// (permissions, a busy port) without changing credentials.
    pub fn is_retriable(&self) -> bool {
        matches!(self, BootstrapError::Io { .. } | BootstrapError::Bind { .. })
    }
}
