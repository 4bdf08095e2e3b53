//! webby: a small embeddable HTTP/1.x server with optional self-signed TLS.
//!
//! ```no_run
//! use webby::{HttpServer, Request, ServerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = HttpServer::new(ServerConfig::default());
//! server.get("/hello/{name}", |req: Request| async move {
//!     format!("hello, {}", req.param("name").unwrap_or("world"))
//! })?;
//! server.serve(webby::lifecycle::shutdown_signal()).await?;
//! # Ok(())
//! # }
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// TLS material
pub mod certs;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use certs::{CertificateMaterial, KeyAlgorithm, ProvisionParams};
pub use config::ServerConfig;
pub use http::middleware::{AccessLog, ErrorHandler, Middleware, Next, RequestIdMiddleware};
pub use http::{
    BoundServer, Handler, HandlerError, HttpServer, Method, Reply, Request, Response, ServerError,
    ServerHandle, StatusCode,
};
pub use lifecycle::Shutdown;
pub use net::TlsSource;
