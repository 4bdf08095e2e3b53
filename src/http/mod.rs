//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → dispatch.rs (per-connection read/dispatch/write loop)
//!     → codec/ (bytes → Request, Response → bytes)
//!     → middleware/ (ordered interceptors)
//!     → routing (method + path → handler)
//!     → handler.rs (application code)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - HTTP/1.0 and HTTP/1.1 only, framed by Content-Length or chunked coding
//! - Request bodies are buffered up to a limit; response bodies may stream
//! - Handlers and middleware are trait objects with blanket impls for async closures

pub mod codec;
pub mod dispatch;
pub mod handler;
pub mod headers;
pub mod method;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod status;

pub use handler::{BoxedHandler, Handler, HandlerError, HandlerResult};
pub use headers::Headers;
pub use method::{Method, Version};
pub use request::{Attributes, PathParams, PeerInfo, QueryParams, Request};
pub use response::{Body, Reply, Response};
pub use server::{BoundServer, HttpServer, ServerError, ServerHandle};
pub use status::StatusCode;
