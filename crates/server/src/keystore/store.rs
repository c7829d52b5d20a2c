//! [`CredentialStore`]: persist and load password-protected identity stores.

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use common::{BootstrapError, CredentialLayer};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::format::{
    encode_der, EntryTable, KdfParams, StoreEnvelope, StoredEntry, FORMAT_TAG, FORMAT_VERSION,
};
use super::lock::{parent_dir, StoreLock};
use crate::crypto::{
    cipher::{self, SealedBlob},
    kdf::{self, derive_key},
    Password,
};
use crate::identity::Identity;

/// Reads and writes credential store files.
///
/// Holds only the KDF cost used for newly sealed layers; files record their
/// own parameters, so any store can be loaded regardless of this setting.
#[derive(Debug, Clone, Copy)]
pub struct CredentialStore {
    kdf_rounds: u32,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self {
            kdf_rounds: kdf::DEFAULT_ROUNDS,
        }
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `rounds` PBKDF2 iterations for layers sealed by this instance,
    /// clamped to [`kdf::MIN_ROUNDS`]..=[`kdf::MAX_ROUNDS`].
    pub fn with_kdf_rounds(rounds: u32) -> Self {
        Self {
            kdf_rounds: rounds.clamp(kdf::MIN_ROUNDS, kdf::MAX_ROUNDS),
        }
    }

    /// Take the process-wide lock for `path`, creating its directory if
    /// needed. Hold it across a load-then-persist sequence and write with
    /// [`CredentialStore::persist_locked`].
    pub fn lock(&self, path: &Path) -> Result<StoreLock, BootstrapError> {
        StoreLock::acquire(path).map_err(|source| BootstrapError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Open the store at `path` with `store_password`.
    ///
    /// Entry private keys stay sealed until
    /// [`CredentialStoreFile::open_entry`] is called with the entry password.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::Io`] if the file cannot be read (including missing).
    /// - [`BootstrapError::StoreCorrupt`] if it is not a store of a supported
    ///   version, or its payload does not open with `store_password`.
    pub fn load(
        &self,
        path: &Path,
        store_password: &Password,
    ) -> Result<CredentialStoreFile, BootstrapError> {
        let bytes = fs::read(path).map_err(|source| BootstrapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let corrupt = |reason: String| BootstrapError::StoreCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        let envelope: StoreEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(format!("not a credential store: {e}")))?;
        if envelope.format != FORMAT_TAG || envelope.version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported store format {:?} version {}",
                envelope.format, envelope.version
            )));
        }

        let salt = envelope.kdf.salt_bytes().map_err(corrupt)?;
        let key = derive_key(store_password, &salt, envelope.kdf.rounds);
        let blob = SealedBlob::parse(&envelope.payload)
            .map_err(|e| corrupt(format!("payload: {e}")))?;
        let plaintext = cipher::open(&blob, key.as_bytes(), FORMAT_TAG.as_bytes()).map_err(|_| {
            corrupt("payload does not open with the given store password".into())
        })?;
        let table: EntryTable = serde_json::from_slice(&plaintext)
            .map_err(|e| corrupt(format!("entry table: {e}")))?;

        debug!(path = %path.display(), entries = table.entries.len(), "credential store loaded");

        Ok(CredentialStoreFile {
            path: path.to_path_buf(),
            kdf: envelope.kdf,
            verifier: key.verifier(),
            entries: table.entries,
        })
    }

    /// Write `identity` under `alias`, sealing its private key with
    /// `entry_password`.
    ///
    /// A missing file is created. An existing file is opened with
    /// `store_password` and the entry is inserted or replaced; a file that
    /// does not open is left untouched and the error is returned. The write
    /// goes to a temporary file in the same directory which is then renamed
    /// over `path`. Concurrent calls for one path in this process are
    /// serialized, so each sees the entries written by the previous one.
    ///
    /// # Errors
    ///
    /// Same as [`CredentialStore::load`] for existing files, plus
    /// [`BootstrapError::Io`] on write failure.
    pub fn persist(
        &self,
        path: &Path,
        store_password: &Password,
        alias: &str,
        identity: &Identity,
        entry_password: &Password,
    ) -> Result<(), BootstrapError> {
        let lock = self.lock(path)?;
        self.persist_locked(&lock, store_password, alias, identity, entry_password)
    }

    /// [`CredentialStore::persist`] to `lock.path()` under a lock the caller
    /// already holds.
    pub fn persist_locked(
        &self,
        lock: &StoreLock,
        store_password: &Password,
        alias: &str,
        identity: &Identity,
        entry_password: &Password,
    ) -> Result<(), BootstrapError> {
        let path = lock.path();
        let mut entries = if path.exists() {
            self.load(path, store_password)?.entries
        } else {
            BTreeMap::new()
        };

        entries.insert(alias.to_owned(), self.seal_entry(alias, identity, entry_password)?);

        let kdf_params = KdfParams::fresh(self.kdf_rounds);
        let salt = kdf_params
            .salt_bytes()
            .map_err(BootstrapError::Crypto)?;
        let key = derive_key(store_password, &salt, kdf_params.rounds);

        let table = serde_json::to_vec(&EntryTable { entries })
            .map_err(|e| BootstrapError::Crypto(format!("entry table encoding failed: {e}")))?;
        let payload = cipher::seal(&table, key.as_bytes(), FORMAT_TAG.as_bytes())
            .map_err(|e| BootstrapError::Crypto(format!("sealing store payload failed: {e}")))?;

        let envelope = StoreEnvelope {
            format: FORMAT_TAG.into(),
            version: FORMAT_VERSION,
            kdf: kdf_params,
            payload: payload.to_string_repr(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| BootstrapError::Crypto(format!("store encoding failed: {e}")))?;

        write_atomically(path, &bytes).map_err(|source| BootstrapError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), alias, "credential store written");
        Ok(())
    }

    fn seal_entry(
        &self,
        alias: &str,
        identity: &Identity,
        entry_password: &Password,
    ) -> Result<StoredEntry, BootstrapError> {
        let kdf_params = KdfParams::fresh(self.kdf_rounds);
        let salt = kdf_params
            .salt_bytes()
            .map_err(BootstrapError::Crypto)?;
        let key = derive_key(entry_password, &salt, kdf_params.rounds);
        let sealed = cipher::seal(identity.private_key_der(), key.as_bytes(), alias.as_bytes())
            .map_err(|e| BootstrapError::Crypto(format!("sealing private key failed: {e}")))?;

        Ok(StoredEntry {
            scheme: identity.scheme(),
            key_size_bits: identity.key_size_bits(),
            certificate_chain: vec![encode_der(identity.certificate_der())],
            kdf: kdf_params,
            private_key: sealed.to_string_repr(),
        })
    }
}

/// An opened credential store. Entry private keys remain sealed.
#[derive(Debug, Clone)]
pub struct CredentialStoreFile {
    path: PathBuf,
    kdf: KdfParams,
    verifier: Vec<u8>,
    entries: BTreeMap<String, StoredEntry>,
}

impl CredentialStoreFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    /// Whether `store_password` is the password this store was opened with.
    pub fn verify_store_password(&self, store_password: &Password) -> bool {
        let Ok(salt) = self.kdf.salt_bytes() else {
            return false;
        };
        derive_key(store_password, &salt, self.kdf.rounds).matches_verifier(&self.verifier)
    }

    /// DER certificate chain of `alias`, leaf first. Needs no entry password.
    ///
    /// # Errors
    ///
    /// [`BootstrapError::AliasNotFound`], or [`BootstrapError::StoreCorrupt`]
    /// for an undecodable chain.
    pub fn certificate_chain(&self, alias: &str) -> Result<Vec<Vec<u8>>, BootstrapError> {
        self.entry(alias)?
            .certificate_chain_der()
            .map_err(|reason| self.corrupt(reason))
    }

    /// Unseal the identity stored under `alias` with `entry_password`.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::AliasNotFound`] if the alias is absent.
    /// - [`BootstrapError::Authentication`] with [`CredentialLayer::Entry`]
    ///   if the password does not open the private key.
    /// - [`BootstrapError::StoreCorrupt`] for malformed entry fields.
    pub fn open_entry(
        &self,
        alias: &str,
        entry_password: &Password,
    ) -> Result<Identity, BootstrapError> {
        let entry = self.entry(alias)?;
        let salt = entry.kdf.salt_bytes().map_err(|r| self.corrupt(r))?;
        let blob = SealedBlob::parse(&entry.private_key)
            .map_err(|e| self.corrupt(format!("private key of {alias:?}: {e}")))?;

        let key = derive_key(entry_password, &salt, entry.kdf.rounds);
        let private_key_der = cipher::open(&blob, key.as_bytes(), alias.as_bytes()).map_err(|_| {
            BootstrapError::Authentication {
                alias: alias.to_owned(),
                layer: CredentialLayer::Entry,
            }
        })?;

        let leaf = entry
            .certificate_chain_der()
            .map_err(|r| self.corrupt(r))?
            .swap_remove(0);

        Identity::from_parts(alias, entry.scheme, entry.key_size_bits, leaf, private_key_der)
    }

    fn entry(&self, alias: &str) -> Result<&StoredEntry, BootstrapError> {
        self.entries
            .get(alias)
            .ok_or_else(|| BootstrapError::AliasNotFound {
                alias: alias.to_owned(),
            })
    }

    fn corrupt(&self, reason: String) -> BootstrapError {
        BootstrapError::StoreCorrupt {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Write `bytes` to a sibling temp file, fsync it, rename it over `path`,
/// then fsync the directory so the rename itself is durable.
///
/// The temp file is created with a unique name and owner-only permissions.
fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;

    Ok(())
}
