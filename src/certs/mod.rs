//! Certificate provisioning for HTTPS listeners.
//!
//! # Data Flow
//! ```text
//! ProvisionParams (subject, validity, algorithm)
//!     → provisioner.rs (rcgen key pair + self-signed certificate)
//!     → CertificateMaterial (DER + PEM, in memory)
//!     → net/tls.rs (rustls ServerConfig for the listener)
//!     → RootCertStore (trust material for clients and tests)
//! ```
//!
//! Consulted once at bind time and on explicit rotation, never per request.

pub mod provisioner;

pub use provisioner::{
    load_or_provision, provision, CertificateMaterial, KeyAlgorithm, ProvisionError, ProvisionParams,
};
