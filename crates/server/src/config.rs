//! Configuration loading and validation.
//!
//! All values are read from `LOCALSERVE_*` environment variables at startup
//! and every one has a default, so a bare `localserve` invocation serves on
//! ports 3544/3545 with a store in the working directory.

use std::{net::IpAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::crypto::{kdf, Password};
use crate::identity::{HashAlgorithm, IdentityRequest, SignAlgorithm, SignatureScheme};
use crate::provision::CredentialSettings;
use crate::server::{
    middleware::split_list, AllowedHeaders, CorsPolicy, PipelineConfig,
};

/// Prefix of every environment variable read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "LOCALSERVE";

/// Validated service configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Address both connectors bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Plaintext HTTP port. `0` picks an ephemeral port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// HTTPS port. `0` picks an ephemeral port.
    #[serde(default = "default_https_port")]
    pub https_port: u16,

    /// Credential store file; created on first start.
    #[serde(default = "default_keystore_path")]
    pub keystore_path: PathBuf,

    /// Password of the credential store as a whole.
    #[serde(default = "default_password")]
    pub keystore_password: String,

    /// Alias of the server identity inside the store.
    #[serde(default = "default_cert_alias")]
    pub cert_alias: String,

    /// Password of the alias' private key.
    #[serde(default = "default_password")]
    pub cert_password: String,

    #[serde(default = "default_cert_hash")]
    pub cert_hash: HashAlgorithm,

    #[serde(default = "default_cert_signature")]
    pub cert_signature: SignAlgorithm,

    #[serde(default = "default_cert_key_size")]
    pub cert_key_size: u32,

    #[serde(default = "default_cert_days_valid")]
    pub cert_days_valid: u32,

    /// Comma-separated DNS names and IP literals for the certificate.
    #[serde(default = "default_subject_alt_names")]
    pub cert_subject_alt_names: String,

    /// PBKDF2 iterations for newly sealed store layers.
    #[serde(default = "default_kdf_rounds")]
    pub kdf_rounds: u32,

    #[serde(default = "default_true")]
    pub cors_allow_any_origin: bool,

    /// Comma-separated origins granted when any-origin is off.
    #[serde(default)]
    pub cors_allowed_origins: String,

    /// Comma-separated header names, or `*` for any.
    #[serde(default = "default_cors_allowed_headers")]
    pub cors_allowed_headers: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP collector endpoint; span export is off when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_http_port() -> u16 {
    3544
}
fn default_https_port() -> u16 {
    3545
}
fn default_keystore_path() -> PathBuf {
    PathBuf::from("ssl.keystore")
}
fn default_password() -> String {
    "vbm-pass".into()
}
fn default_cert_alias() -> String {
    "verifybyme".into()
}
fn default_cert_hash() -> HashAlgorithm {
    HashAlgorithm::Sha256
}
fn default_cert_signature() -> SignAlgorithm {
    SignAlgorithm::Ecdsa
}
fn default_cert_key_size() -> u32 {
    256
}
fn default_cert_days_valid() -> u32 {
    // 25 years.
    9125
}
fn default_subject_alt_names() -> String {
    "localhost,127.0.0.1".into()
}
fn default_kdf_rounds() -> u32 {
    kdf::DEFAULT_ROUNDS
}
fn default_true() -> bool {
    true
}
fn default_cors_allowed_headers() -> String {
    "*".into()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_shutdown_grace() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            https_port: default_https_port(),
            keystore_path: default_keystore_path(),
            keystore_password: default_password(),
            cert_alias: default_cert_alias(),
            cert_password: default_password(),
            cert_hash: default_cert_hash(),
            cert_signature: default_cert_signature(),
            cert_key_size: default_cert_key_size(),
            cert_days_valid: default_cert_days_valid(),
            cert_subject_alt_names: default_subject_alt_names(),
            kdf_rounds: default_kdf_rounds(),
            cors_allow_any_origin: default_true(),
            cors_allowed_origins: String::new(),
            cors_allowed_headers: default_cors_allowed_headers(),
            request_timeout_secs: default_request_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            log_level: default_log_level(),
            otel_exporter_otlp_endpoint: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("http_port", &self.http_port)
            .field("https_port", &self.https_port)
            .field("keystore_path", &self.keystore_path)
            .field("keystore_password", &"[REDACTED]")
            .field("cert_alias", &self.cert_alias)
            .field("cert_password", &"[REDACTED]")
            .field("cert_hash", &self.cert_hash)
            .field("cert_signature", &self.cert_signature)
            .field("cert_key_size", &self.cert_key_size)
            .field("cert_days_valid", &self.cert_days_valid)
            .field("cert_subject_alt_names", &self.cert_subject_alt_names)
            .field("kdf_rounds", &self.kdf_rounds)
            .field("cors_allow_any_origin", &self.cors_allow_any_origin)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("cors_allowed_headers", &self.cors_allowed_headers)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("shutdown_grace_secs", &self.shutdown_grace_secs)
            .field("log_level", &self.log_level)
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .finish()
    }
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or a value is invalid.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.keystore_path.to_string_lossy(), "KEYSTORE_PATH")?;
        ensure_non_empty(&self.keystore_password, "KEYSTORE_PASSWORD")?;
        ensure_non_empty(&self.cert_alias, "CERT_ALIAS")?;
        ensure_non_empty(&self.cert_password, "CERT_PASSWORD")?;

        if self.http_port != 0 && self.http_port == self.https_port {
            anyhow::bail!("HTTP_PORT and HTTPS_PORT must differ (both {})", self.http_port);
        }
        if self.cert_days_valid == 0 {
            anyhow::bail!("CERT_DAYS_VALID must be > 0");
        }
        if !(kdf::MIN_ROUNDS..=kdf::MAX_ROUNDS).contains(&self.kdf_rounds) {
            anyhow::bail!(
                "KDF_ROUNDS must be between {} and {}",
                kdf::MIN_ROUNDS,
                kdf::MAX_ROUNDS
            );
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be > 0");
        }
        if !self.cors_allow_any_origin && split_list(&self.cors_allowed_origins).is_empty() {
            anyhow::bail!("CORS_ALLOWED_ORIGINS is required when CORS_ALLOW_ANY_ORIGIN is false");
        }
        Ok(())
    }

    /// Identity parameters used when the alias has to be generated.
    pub fn identity_request(&self) -> IdentityRequest {
        IdentityRequest {
            alias: self.cert_alias.clone(),
            scheme: SignatureScheme {
                hash: self.cert_hash,
                sign: self.cert_signature,
            },
            key_size_bits: self.cert_key_size,
            days_valid: self.cert_days_valid,
            subject_alt_names: split_list(&self.cert_subject_alt_names),
        }
    }

    pub fn credentials(&self) -> CredentialSettings {
        CredentialSettings {
            store_path: self.keystore_path.clone(),
            store_password: Password::new(self.keystore_password.as_str()),
            entry_password: Password::new(self.cert_password.as_str()),
            identity: self.identity_request(),
            kdf_rounds: self.kdf_rounds,
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            cors: CorsPolicy {
                allow_any_origin: self.cors_allow_any_origin,
                allowed_origins: split_list(&self.cors_allowed_origins),
                allowed_headers: AllowedHeaders::parse(&self.cors_allowed_headers),
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
