//! Create-or-reuse provisioning of the TLS identity.
//!
//! A store that exists is the source of truth: its alias is reused as is, a
//! missing alias is generated and added, and a store that fails to open stops
//! startup instead of being regenerated.

use std::path::PathBuf;

use common::BootstrapError;
use tracing::info;

use crate::crypto::Password;
use crate::identity::{resolve_algorithm, IdentityGenerator, IdentityRequest};
use crate::keystore::{CredentialStore, CredentialStoreFile};
use crate::server::{TlsContextFactory, TlsServerContext};

/// Everything needed to locate, open or create the server identity.
#[derive(Debug, Clone)]
pub struct CredentialSettings {
    pub store_path: PathBuf,
    pub store_password: Password,
    pub entry_password: Password,
    /// Parameters used only when the alias has to be generated.
    pub identity: IdentityRequest,
    pub kdf_rounds: u32,
}

/// What [`ensure_store`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// No store existed; one was created with a fresh identity.
    Created,
    /// The store existed without the alias; a fresh identity was added.
    AliasAdded,
    /// The store already held the alias.
    Reused,
}

/// Make sure the store at `settings.store_path` holds `settings.identity.alias`
/// and return it opened.
///
/// The store lock is held from the existence check to the final load, so
/// concurrent callers for one path generate the alias at most once.
///
/// # Errors
///
/// - [`BootstrapError::Parameter`] / [`BootstrapError::Crypto`] for an
///   unsupported identity request, before any file is touched.
/// - Any error of [`CredentialStore::load`] / [`CredentialStore::persist`].
/// - Any error of the generator.
pub fn ensure_store(
    settings: &CredentialSettings,
    generator: &dyn IdentityGenerator,
) -> Result<(CredentialStoreFile, Provisioned), BootstrapError> {
    resolve_algorithm(&settings.identity)?;

    let store = CredentialStore::with_kdf_rounds(settings.kdf_rounds);
    let lock = store.lock(&settings.store_path)?;
    let path = lock.path();
    let alias = settings.identity.alias.as_str();

    let outcome = if path.exists() {
        let file = store.load(path, &settings.store_password)?;
        if file.contains_alias(alias) {
            info!(path = %path.display(), alias, "reusing stored TLS identity");
            return Ok((file, Provisioned::Reused));
        }
        Provisioned::AliasAdded
    } else {
        Provisioned::Created
    };

    info!(
        path = %path.display(),
        alias,
        scheme = %settings.identity.scheme,
        key_size_bits = settings.identity.key_size_bits,
        "generating TLS identity"
    );
    let identity = generator.generate(&settings.identity)?;
    store.persist_locked(
        &lock,
        &settings.store_password,
        alias,
        &identity,
        &settings.entry_password,
    )?;

    let file = store.load(path, &settings.store_password)?;
    Ok((file, outcome))
}

/// [`ensure_store`], then build the TLS server context for the alias.
///
/// # Errors
///
/// Any error of [`ensure_store`] or [`TlsContextFactory::build`].
pub fn ensure_tls_context(
    settings: &CredentialSettings,
    generator: &dyn IdentityGenerator,
) -> Result<TlsServerContext, BootstrapError> {
    let (file, _) = ensure_store(settings, generator)?;
    TlsContextFactory.build(
        &file,
        &settings.identity.alias,
        &settings.store_password,
        &settings.entry_password,
    )
}
