//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::certs::{KeyAlgorithm, ProvisionParams};
use crate::http::codec::DecoderLimits;
use crate::net::tls::TlsSource;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
///
/// ```toml
/// [listener.tls]
/// mode = "files"
/// cert_path = "certs/server.pem"
/// key_path = "certs/server.key"
/// ```
///
/// ```toml
/// [listener.tls]
/// mode = "self_signed"
/// subject_name = "localhost"
/// validity_days = 7
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TlsConfig {
    /// PEM certificate chain and private key on disk.
    Files { cert_path: PathBuf, key_path: PathBuf },

    /// Generate a self-signed certificate at startup.
    SelfSigned {
        #[serde(default = "default_subject_name")]
        subject_name: String,
        #[serde(default)]
        organization: Option<String>,
        #[serde(default)]
        alt_names: Vec<String>,
        #[serde(default = "default_validity_days")]
        validity_days: u64,
        #[serde(default)]
        algorithm: KeyAlgorithm,
        /// Reuse a still-valid certificate from this directory across restarts.
        #[serde(default)]
        persist_dir: Option<PathBuf>,
    },
}

fn default_subject_name() -> String {
    "localhost".to_string()
}

fn default_validity_days() -> u64 {
    1
}

impl TlsConfig {
    pub fn to_source(&self) -> TlsSource {
        match self {
            TlsConfig::Files {
                cert_path,
                key_path,
            } => TlsSource::Files {
                cert: cert_path.clone(),
                key: key_path.clone(),
            },
            TlsConfig::SelfSigned {
                subject_name,
                organization,
                alt_names,
                validity_days,
                algorithm,
                persist_dir,
            } => TlsSource::AutoProvision {
                params: ProvisionParams {
                    subject_name: subject_name.clone(),
                    organization: organization.clone(),
                    alt_names: alt_names.clone(),
                    validity: Duration::from_secs(validity_days.saturating_mul(24 * 60 * 60)),
                    algorithm: *algorithm,
                },
                persist_dir: persist_dir.clone(),
            },
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of header fields.
    pub max_header_count: usize,

    /// Maximum size of the request line plus headers, in bytes.
    pub max_header_bytes: usize,

    /// Maximum decoded body size, in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = DecoderLimits::default();
        Self {
            max_header_count: limits.max_header_count,
            max_header_bytes: limits.max_header_bytes,
            max_body_bytes: limits.max_body_bytes,
        }
    }
}

impl LimitsConfig {
    pub fn decoder_limits(&self) -> DecoderLimits {
        DecoderLimits {
            max_header_count: self.max_header_count,
            max_header_bytes: self.max_header_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long an idle keep-alive connection waits for the next request.
    pub idle_secs: u64,

    /// How long a started request (or TLS handshake) may take to arrive in full.
    pub read_secs: u64,

    /// How long shutdown waits for in-flight exchanges before aborting them.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 60,
            read_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON lines.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.limits.max_header_count, 64);
        assert_eq!(config.limits.max_header_bytes, 16 * 1024);
        assert_eq!(config.limits.max_body_bytes, 1024 * 1024);
        assert!(config.listener.tls.is_none());
    }

    #[test]
    fn self_signed_tls_section_parses() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:8443"

            [listener.tls]
            mode = "self_signed"
            subject_name = "dev.local"
            validity_days = 7
            algorithm = "ed25519"
            "#,
        )
        .unwrap();

        match config.listener.tls.unwrap().to_source() {
            TlsSource::AutoProvision { params, persist_dir } => {
                assert_eq!(params.subject_name, "dev.local");
                assert_eq!(params.validity, Duration::from_secs(7 * 24 * 60 * 60));
                assert_eq!(params.algorithm, KeyAlgorithm::Ed25519);
                assert!(persist_dir.is_none());
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn files_tls_section_parses() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener.tls]
            mode = "files"
            cert_path = "certs/server.pem"
            key_path = "certs/server.key"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.listener.tls,
            Some(TlsConfig::Files {
                cert_path: "certs/server.pem".into(),
                key_path: "certs/server.key".into(),
            })
        );
    }
}
