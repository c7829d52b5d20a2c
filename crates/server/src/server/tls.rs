//! TLS server context built from a credential store entry.
//!
//! The certificate chain and private key are unsealed in memory and handed to
//! `rustls`; they are never re-serialized to disk.

use std::sync::Arc;

use common::{BootstrapError, CredentialLayer};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    ServerConfig,
};
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::crypto::Password;
use crate::keystore::CredentialStoreFile;

/// ALPN protocols offered on TLS connectors.
const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// A ready-to-use TLS server configuration for one alias.
#[derive(Clone)]
pub struct TlsServerContext {
    alias: String,
    certificate: CertificateDer<'static>,
    config: Arc<ServerConfig>,
}

impl TlsServerContext {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Leaf certificate presented to clients.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config())
    }
}

impl std::fmt::Debug for TlsServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsServerContext")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

/// Builds [`TlsServerContext`]s from opened credential stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsContextFactory;

impl TlsContextFactory {
    /// Unseal `alias` from `store` and build a `rustls` server configuration.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::Authentication`] ([`CredentialLayer::Store`]) if
    ///   `store_password` is not the password `store` was opened with.
    /// - [`BootstrapError::AliasNotFound`] if the alias is absent.
    /// - [`BootstrapError::Authentication`] ([`CredentialLayer::Entry`]) if
    ///   `entry_password` does not open the private key.
    /// - [`BootstrapError::Crypto`] if `rustls` rejects the key material.
    pub fn build(
        &self,
        store: &CredentialStoreFile,
        alias: &str,
        store_password: &Password,
        entry_password: &Password,
    ) -> Result<TlsServerContext, BootstrapError> {
        if !store.verify_store_password(store_password) {
            return Err(BootstrapError::Authentication {
                alias: alias.to_owned(),
                layer: CredentialLayer::Store,
            });
        }

        let chain: Vec<CertificateDer<'static>> = store
            .certificate_chain(alias)?
            .into_iter()
            .map(CertificateDer::from)
            .collect();
        let identity = store.open_entry(alias, entry_password)?;
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            identity.private_key_der().to_vec(),
        ));

        let certificate = chain[0].clone();
        let config = build_server_config(chain, key)?;

        info!(alias, store = %store.path().display(), "TLS context ready");

        Ok(TlsServerContext {
            alias: alias.to_owned(),
            certificate,
            config,
        })
    }
}

/// Build a [`rustls::ServerConfig`] on the `ring` provider from DER material.
///
/// # Errors
///
/// Returns [`BootstrapError::Crypto`] if rustls rejects the configuration.
pub fn build_server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>, BootstrapError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| BootstrapError::Crypto(format!("TLS protocol versions rejected: {e}")))?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| BootstrapError::Crypto(format!("failed to build TLS server config: {e}")))?;

    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Ok(Arc::new(config))
}
