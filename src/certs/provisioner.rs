//! Self-signed certificate provisioning.
//!
//! # Responsibilities
//! - Generate a fresh key pair for the requested algorithm
//! - Issue a self-signed X.509 certificate (subject = issuer) for it
//! - Hand out the result as rustls server credentials and client trust roots
//! - Optionally persist the bundle as PEM and reload it while still valid
//!
//! # Design Decisions
//! - Material lives in memory unless `persist` is called explicitly
//! - RSA is recognised in configuration but refused: the key generator only
//!   produces ECDSA and Ed25519 keys
//! - Serial numbers are random positive 128-bit integers

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::RootCertStore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::net::tls::{self, TlsError};

pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("certificate subject name is empty")]
    EmptySubject,

    #[error("invalid validity period {0:?}")]
    InvalidValidity(Duration),

    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(KeyAlgorithm),

    #[error("key generation failed: {0}")]
    KeyGeneration(#[source] rcgen::Error),

    #[error("certificate signing failed: {0}")]
    Signing(#[source] rcgen::Error),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("persisted certificate is unusable: {0}")]
    InvalidPersisted(String),

    #[error("failed to build trust store: {0}")]
    Trust(#[from] rustls::Error),
}

/// Key pair algorithm for provisioned certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
    Ed25519,
    Rsa { bits: u32 },
}

impl KeyAlgorithm {
    fn signature_algorithm(&self) -> Result<&'static rcgen::SignatureAlgorithm, ProvisionError> {
        match self {
            KeyAlgorithm::EcdsaP256 => Ok(&rcgen::PKCS_ECDSA_P256_SHA256),
            KeyAlgorithm::EcdsaP384 => Ok(&rcgen::PKCS_ECDSA_P384_SHA384),
            KeyAlgorithm::Ed25519 => Ok(&rcgen::PKCS_ED25519),
            KeyAlgorithm::Rsa { .. } => Err(ProvisionError::UnsupportedAlgorithm(*self)),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::EcdsaP256 => f.write_str("ECDSA P-256"),
            KeyAlgorithm::EcdsaP384 => f.write_str("ECDSA P-384"),
            KeyAlgorithm::Ed25519 => f.write_str("Ed25519"),
            KeyAlgorithm::Rsa { bits } => write!(f, "RSA-{bits}"),
        }
    }
}

/// What to put in a provisioned certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionParams {
    /// Common name; always included as a subject alternative name.
    pub subject_name: String,
    pub organization: Option<String>,
    /// Extra DNS names or IP addresses.
    pub alt_names: Vec<String>,
    pub validity: Duration,
    pub algorithm: KeyAlgorithm,
}

impl Default for ProvisionParams {
    fn default() -> Self {
        Self {
            subject_name: "localhost".to_string(),
            organization: None,
            alt_names: Vec::new(),
            validity: Duration::from_secs(24 * 60 * 60),
            algorithm: KeyAlgorithm::default(),
        }
    }
}

impl ProvisionParams {
    pub fn new(subject_name: impl Into<String>) -> Self {
        Self {
            subject_name: subject_name.into(),
            ..Self::default()
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_alt_name(mut self, name: impl Into<String>) -> Self {
        self.alt_names.push(name.into());
        self
    }
}

/// A key pair and the self-signed certificate binding it to a subject.
pub struct CertificateMaterial {
    cert_der: CertificateDer<'static>,
    key_der: PrivatePkcs8KeyDer<'static>,
    cert_pem: String,
    key_pem: String,
    subject: String,
    serial: Vec<u8>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
}

impl Clone for CertificateMaterial {
    fn clone(&self) -> Self {
        Self {
            cert_der: self.cert_der.clone(),
            key_der: self.key_der.clone_key(),
            cert_pem: self.cert_pem.clone(),
            key_pem: self.key_pem.clone(),
            subject: self.subject.clone(),
            serial: self.serial.clone(),
            not_before: self.not_before,
            not_after: self.not_after,
        }
    }
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("subject", &self.subject)
            .field("serial", &self.serial_hex())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Generate a key pair and a self-signed certificate.
pub fn provision(params: &ProvisionParams) -> Result<CertificateMaterial, ProvisionError> {
    let subject = params.subject_name.trim();
    if subject.is_empty() {
        return Err(ProvisionError::EmptySubject);
    }
    let algorithm = params.algorithm.signature_algorithm()?;

    let lifetime = time::Duration::try_from(params.validity)
        .map_err(|_| ProvisionError::InvalidValidity(params.validity))?;
    if lifetime.is_zero() {
        return Err(ProvisionError::InvalidValidity(params.validity));
    }
    let not_before = OffsetDateTime::now_utc();
    let not_after = not_before
        .checked_add(lifetime)
        .ok_or(ProvisionError::InvalidValidity(params.validity))?;

    let mut names = vec![subject.to_string()];
    names.extend(params.alt_names.iter().cloned());
    let mut cert_params = CertificateParams::new(names).map_err(ProvisionError::Signing)?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, subject);
    if let Some(org) = &params.organization {
        dn.push(DnType::OrganizationName, org.as_str());
    }
    cert_params.distinguished_name = dn;
    cert_params.not_before = not_before;
    cert_params.not_after = not_after;

    let serial = random_serial();
    cert_params.serial_number = Some(SerialNumber::from_slice(&serial));

    let key_pair = KeyPair::generate_for(algorithm).map_err(ProvisionError::KeyGeneration)?;
    let cert = cert_params
        .self_signed(&key_pair)
        .map_err(ProvisionError::Signing)?;

    tracing::info!(
        subject,
        algorithm = %params.algorithm,
        serial = %hex(&serial),
        ?not_after,
        "provisioned self-signed certificate"
    );

    Ok(CertificateMaterial {
        cert_der: cert.der().clone(),
        key_der: PrivatePkcs8KeyDer::from(key_pair.serialize_der()),
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        subject: subject.to_string(),
        serial,
        not_before,
        not_after,
    })
}

/// Reuse a still-valid bundle from `dir`, or provision and persist a new one.
pub fn load_or_provision(
    dir: &Path,
    params: &ProvisionParams,
) -> Result<CertificateMaterial, ProvisionError> {
    if dir.join(CERT_FILE).exists() && dir.join(KEY_FILE).exists() {
        match CertificateMaterial::load(dir) {
            Ok(material)
                if material.subject == params.subject_name.trim()
                    && material.is_valid_at(OffsetDateTime::now_utc()) =>
            {
                tracing::info!(dir = %dir.display(), subject = %material.subject, "reusing persisted certificate");
                return Ok(material);
            }
            Ok(material) => {
                tracing::info!(
                    dir = %dir.display(),
                    subject = %material.subject,
                    not_after = ?material.not_after,
                    "persisted certificate expired or for another subject, replacing"
                );
            }
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "persisted certificate unreadable, replacing");
            }
        }
    }

    let material = provision(params)?;
    material.persist(dir)?;
    Ok(material)
}

impl CertificateMaterial {
    /// Build material from PEM text, e.g. files written by [`persist`](Self::persist).
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, ProvisionError> {
        let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| ProvisionError::InvalidPersisted("no certificate in PEM".into()))?
            .map_err(|e| ProvisionError::InvalidPersisted(e.to_string()))?;
        let key_der = match rustls_pemfile::private_key(&mut key_pem.as_bytes())
            .map_err(|e| ProvisionError::InvalidPersisted(e.to_string()))?
        {
            Some(PrivateKeyDer::Pkcs8(key)) => key,
            Some(_) => return Err(ProvisionError::InvalidPersisted("key is not PKCS#8".into())),
            None => return Err(ProvisionError::InvalidPersisted("no private key in PEM".into())),
        };

        let (_, parsed) = x509_parser::parse_x509_certificate(cert_der.as_ref())
            .map_err(|e| ProvisionError::InvalidPersisted(e.to_string()))?;
        let subject = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();
        let serial = parsed.raw_serial().to_vec();
        let not_before = parsed.validity().not_before.to_datetime();
        let not_after = parsed.validity().not_after.to_datetime();

        Ok(Self {
            cert_der,
            key_der,
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            subject,
            serial,
            not_before,
            not_after,
        })
    }

    /// Read `cert.pem` and `key.pem` from `dir`.
    pub fn load(dir: &Path) -> Result<Self, ProvisionError> {
        let cert_pem = read(&dir.join(CERT_FILE))?;
        let key_pem = read(&dir.join(KEY_FILE))?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Write `cert.pem` and `key.pem` into `dir`, creating it if needed.
    pub fn persist(&self, dir: &Path) -> Result<(), ProvisionError> {
        std::fs::create_dir_all(dir).map_err(|source| ProvisionError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        write(&dir.join(CERT_FILE), &self.cert_pem)?;
        write_private(&dir.join(KEY_FILE), &self.key_pem)?;
        tracing::info!(dir = %dir.display(), subject = %self.subject, "persisted certificate");
        Ok(())
    }

    /// rustls credentials for a TLS listener.
    pub fn server_config(&self) -> Result<Arc<rustls::ServerConfig>, TlsError> {
        tls::build_server_config(vec![self.cert_der.clone()], self.private_key())
    }

    /// Trust roots containing only this certificate, for clients.
    pub fn root_store(&self) -> Result<RootCertStore, ProvisionError> {
        let mut roots = RootCertStore::empty();
        roots.add(self.cert_der.clone())?;
        Ok(roots)
    }

    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(self.key_der.clone_key())
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn serial_hex(&self) -> String {
        hex(&self.serial)
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        self.not_before <= at && at < self.not_after
    }
}

fn random_serial() -> Vec<u8> {
    let mut serial = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial);
    // Positive, and never zero.
    serial[0] &= 0x7f;
    serial[0] |= 0x01;
    serial.to_vec()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn read(path: &Path) -> Result<String, ProvisionError> {
    std::fs::read_to_string(path).map_err(|source| ProvisionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &str) -> Result<(), ProvisionError> {
    std::fs::write(path, contents).map_err(|source| ProvisionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a private key readable by the owner only.
fn write_private(path: &Path, contents: &str) -> Result<(), ProvisionError> {
    let io_err = |source: std::io::Error| ProvisionError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        // `mode` only applies on creation; tighten a file left by an older run.
        if path.exists() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(io_err)?;
        }
    }
    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(contents.as_bytes()).map_err(io_err)
}
