//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits and timeouts > 0, addresses parse)
//! - Reject TLS settings that would only fail later at bind time
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::certs::KeyAlgorithm;
use crate::config::schema::{ServerConfig, TlsConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("limits.{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("observability.log_level `{0}` is not a valid filter")]
    LogLevel(String),

    #[error("listener.tls.subject_name must not be empty")]
    EmptySubject,

    #[error("listener.tls.validity_days must be greater than zero")]
    ZeroValidity,

    #[error("listener.tls.algorithm {0} is not supported for self-signed certificates")]
    UnsupportedAlgorithm(KeyAlgorithm),
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }

    let limits = &config.limits;
    for (name, value) in [
        ("max_header_count", limits.max_header_count),
        ("max_header_bytes", limits.max_header_bytes),
        ("max_body_bytes", limits.max_body_bytes),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit(name));
        }
    }

    let timeouts = &config.timeouts;
    for (name, value) in [
        ("idle_secs", timeouts.idle_secs),
        ("read_secs", timeouts.read_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }

    if let Some(TlsConfig::SelfSigned {
        subject_name,
        validity_days,
        algorithm,
        ..
    }) = &config.listener.tls
    {
        if subject_name.trim().is_empty() {
            errors.push(ValidationError::EmptySubject);
        }
        if *validity_days == 0 {
            errors.push(ValidationError::ZeroValidity);
        }
        if matches!(algorithm, KeyAlgorithm::Rsa { .. }) {
            errors.push(ValidationError::UnsupportedAlgorithm(*algorithm));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
