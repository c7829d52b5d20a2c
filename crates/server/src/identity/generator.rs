//! Key pair + self-signed certificate generation with `rcgen`.

use std::net::IpAddr;

use common::BootstrapError;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SanType, SignatureAlgorithm,
};
use time::{Duration, OffsetDateTime};
use tracing::{debug, instrument};

use super::{HashAlgorithm, Identity, IdentityGenerator, IdentityRequest, SignAlgorithm};

/// Longest validity window accepted, in days.
pub const MAX_DAYS_VALID: u32 = 36_500;

const RSA_BITS: std::ops::RangeInclusive<u32> = 2048..=8192;

/// Generates identities with the `ring` backend of `rcgen`.
///
/// Supported combinations:
///
/// | sign    | bits | hash    |
/// |---------|------|---------|
/// | ECDSA   | 256  | SHA-256 |
/// | ECDSA   | 384  | SHA-384 |
/// | Ed25519 | 256  | SHA-512 |
///
/// RSA sizes are accepted as parameters but the provider cannot create RSA
/// keys, so they fail with [`BootstrapError::Crypto`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMaterialGenerator;

impl KeyMaterialGenerator {
    pub fn new() -> Self {
        Self
    }
}

/// Check `request` and resolve the `rcgen` algorithm for it, without
/// touching any randomness or I/O.
///
/// # Errors
///
/// [`BootstrapError::Parameter`] for out-of-range sizes, days or names;
/// [`BootstrapError::Crypto`] for a valid size paired with an unsupported hash.
pub fn resolve_algorithm(
    request: &IdentityRequest,
) -> Result<&'static SignatureAlgorithm, BootstrapError> {
    if request.alias.trim().is_empty() {
        return Err(BootstrapError::Parameter("alias must not be empty".into()));
    }
    if request.days_valid == 0 || request.days_valid > MAX_DAYS_VALID {
        return Err(BootstrapError::Parameter(format!(
            "days_valid must be in 1..={MAX_DAYS_VALID}, got {}",
            request.days_valid
        )));
    }
    subject_alt_names(&request.subject_alt_names)?;

    let bits = request.key_size_bits;
    let hash = request.scheme.hash;
    let unsupported = || {
        BootstrapError::Crypto(format!(
            "{} with a {bits}-bit key is not supported by the provider",
            request.scheme
        ))
    };

    match request.scheme.sign {
        SignAlgorithm::Ecdsa => match (bits, hash) {
            (256, HashAlgorithm::Sha256) => Ok(&rcgen::PKCS_ECDSA_P256_SHA256),
            (384, HashAlgorithm::Sha384) => Ok(&rcgen::PKCS_ECDSA_P384_SHA384),
            (256 | 384, _) => Err(unsupported()),
            _ => Err(BootstrapError::Parameter(format!(
                "ECDSA key size must be 256 or 384 bits, got {bits}"
            ))),
        },
        SignAlgorithm::Ed25519 => match (bits, hash) {
            (256, HashAlgorithm::Sha512) => Ok(&rcgen::PKCS_ED25519),
            (256, _) => Err(unsupported()),
            _ => Err(BootstrapError::Parameter(format!(
                "Ed25519 key size must be 256 bits, got {bits}"
            ))),
        },
        SignAlgorithm::Rsa => {
            if !RSA_BITS.contains(&bits) || bits % 1024 != 0 {
                return Err(BootstrapError::Parameter(format!(
                    "RSA key size must be a multiple of 1024 in 2048..=8192, got {bits}"
                )));
            }
            Ok(match hash {
                HashAlgorithm::Sha256 => &rcgen::PKCS_RSA_SHA256,
                HashAlgorithm::Sha384 => &rcgen::PKCS_RSA_SHA384,
                HashAlgorithm::Sha512 => &rcgen::PKCS_RSA_SHA512,
            })
        }
    }
}

impl IdentityGenerator for KeyMaterialGenerator {
    #[instrument(skip_all, fields(alias = %request.alias, scheme = %request.scheme, bits = request.key_size_bits))]
    fn generate(&self, request: &IdentityRequest) -> Result<Identity, BootstrapError> {
        let alg = resolve_algorithm(request)?;

        let key_pair = KeyPair::generate_for(alg)
            .map_err(|e| BootstrapError::Crypto(format!("key pair generation failed: {e}")))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, request.alias.as_str());
        params.distinguished_name = dn;
        params.subject_alt_names = subject_alt_names(&request.subject_alt_names)?;

        // X.509 times carry whole seconds only.
        let now = OffsetDateTime::now_utc();
        let not_before = OffsetDateTime::from_unix_timestamp(now.unix_timestamp())
            .map_err(|e| BootstrapError::Crypto(format!("system clock out of range: {e}")))?;
        params.not_before = not_before;
        params.not_after = not_before + Duration::days(i64::from(request.days_valid));

        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| BootstrapError::Crypto(format!("self-signing failed: {e}")))?;

        debug!("self-signed certificate generated");

        Identity::from_parts(
            request.alias.clone(),
            request.scheme,
            request.key_size_bits,
            cert.der().to_vec(),
            key_pair.serialize_der(),
        )
    }
}

fn subject_alt_names(names: &[String]) -> Result<Vec<SanType>, BootstrapError> {
    names
        .iter()
        .map(|name| match name.parse::<IpAddr>() {
            Ok(ip) => Ok(SanType::IpAddress(ip)),
            Err(_) => name
                .as_str()
                .try_into()
                .map(SanType::DnsName)
                .map_err(|e| {
                    BootstrapError::Parameter(format!("invalid subject alt name {name:?}: {e}"))
                }),
        })
        .collect()
}
