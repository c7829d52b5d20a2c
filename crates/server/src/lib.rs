//! `localserve`: a local-network HTTP + HTTPS server with a self-provisioned
//! TLS identity.
//!
//! Startup sequence ([`launch`]):
//! 1. Open the credential store, generating the identity on first run.
//! 2. Build the `rustls` server context from the stored alias.
//! 3. Build the routing pipeline shared by both connectors.
//! 4. Bind the plaintext and TLS connectors, all or nothing.

pub mod config;
pub mod crypto;
pub mod identity;
pub mod keystore;
pub mod provision;
pub mod server;
pub mod telemetry;

use common::BootstrapError;

pub use common::CredentialLayer;
pub use config::Config;
pub use server::{Endpoint, LifecycleState, Scheme, ServerBootstrap, ServerProcess};

use identity::KeyMaterialGenerator;
use server::{ConnectorSpec, Pipeline};

/// Provision the TLS identity and start both connectors from `cfg`.
///
/// # Errors
///
/// The first [`BootstrapError`] of any startup stage; nothing keeps running
/// on failure.
pub async fn launch(cfg: &Config) -> Result<ServerProcess, BootstrapError> {
    // PBKDF2 and key generation are CPU-bound.
    let credentials = cfg.credentials();
    let tls = tokio::task::spawn_blocking(move || {
        provision::ensure_tls_context(&credentials, &KeyMaterialGenerator::new())
    })
    .await
    .map_err(|e| BootstrapError::Crypto(format!("provisioning task failed: {e}")))??;

    let pipeline = Pipeline::build(&cfg.pipeline())?;
    let specs = vec![
        ConnectorSpec::plain(cfg.http_port).with_address(cfg.bind_address),
        ConnectorSpec::tls(cfg.https_port, tls).with_address(cfg.bind_address),
    ];

    ServerBootstrap::new(cfg.shutdown_grace())
        .start(specs, &pipeline)
        .await
}
