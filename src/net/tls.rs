//! TLS configuration, certificate loading and handshakes.
//!
//! # Responsibilities
//! - Load PEM certificate chains and private keys from disk
//! - Build rustls server configurations (HTTP/1.1 ALPN)
//! - Resolve a [`TlsSource`] into credentials at bind time
//! - Swap credentials atomically on rotation

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;

use crate::certs::{self, CertificateMaterial, ProvisionError, ProvisionParams};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Where a TLS listener gets its credentials.
#[derive(Debug, Clone)]
pub enum TlsSource {
    /// PEM certificate chain and private key files.
    Files { cert: PathBuf, key: PathBuf },
    /// Material already in memory.
    Material(CertificateMaterial),
    /// Self-signed material generated at bind time, optionally reused from a directory.
    AutoProvision {
        params: ProvisionParams,
        persist_dir: Option<PathBuf>,
    },
}

impl TlsSource {
    pub fn self_signed(params: ProvisionParams) -> Self {
        TlsSource::AutoProvision {
            params,
            persist_dir: None,
        }
    }

    /// Produce the server configuration, plus the material when it was
    /// generated or supplied in memory.
    pub fn resolve(
        &self,
    ) -> Result<(Arc<rustls::ServerConfig>, Option<CertificateMaterial>), TlsError> {
        match self {
            TlsSource::Files { cert, key } => {
                let config = load_pem_files(cert, key)?;
                tracing::info!(cert = %cert.display(), key = %key.display(), "loaded TLS certificate files");
                Ok((config, None))
            }
            TlsSource::Material(material) => Ok((material.server_config()?, Some(material.clone()))),
            TlsSource::AutoProvision {
                params,
                persist_dir,
            } => {
                let material = match persist_dir {
                    Some(dir) => certs::load_or_provision(dir, params)?,
                    None => certs::provision(params)?,
                };
                Ok((material.server_config()?, Some(material)))
            }
        }
    }
}

/// Build a server configuration from a certificate chain and key.
pub fn build_server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let mut config =
        rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Load a PEM certificate chain and private key.
pub fn load_pem_files(cert_path: &Path, key_path: &Path) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let mut cert_reader = open(cert_path)?;
    let chain = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: cert_path.to_path_buf(),
            source,
        })?;
    if chain.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let mut key_reader = open(key_path)?;
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|source| TlsError::Io {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    build_server_config(chain, key)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Performs server-side handshakes with swappable credentials.
///
/// Rotation affects new handshakes only; established sessions keep the
/// configuration they were accepted with.
#[derive(Clone)]
pub struct TlsAcceptor {
    config: Arc<ArcSwap<rustls::ServerConfig>>,
}

impl TlsAcceptor {
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            config: Arc::new(ArcSwap::new(config)),
        }
    }

    /// Replace the credentials used for subsequent handshakes.
    pub fn rotate(&self, config: Arc<rustls::ServerConfig>) {
        self.config.store(config);
        tracing::info!("TLS credentials rotated");
    }

    pub fn config_snapshot(&self) -> Arc<rustls::ServerConfig> {
        self.config.load_full()
    }

    pub async fn accept<IO>(&self, stream: IO) -> std::io::Result<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        tokio_rustls::TlsAcceptor::from(self.config.load_full())
            .accept(stream)
            .await
    }
}

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAcceptor").finish_non_exhaustive()
    }
}
