//! HTTP/1.x message codec.
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → decoder.rs (start line + headers via httparse, limits, body framing)
//!     → chunked.rs (chunked transfer-coding, incremental)
//!     → Request
//!
//! Response
//!     → encoder.rs (status line, framing headers, body)
//!     → chunked.rs (when the body length is unknown)
//!     → socket bytes
//! ```
//!
//! # Design Decisions
//! - Header block size and count are bounded before any body is read
//! - Content-Length together with Transfer-Encoding is rejected, never guessed
//! - Unknown methods are reported only after the message is framed, so the
//!   connection can continue with the next request

pub mod chunked;
pub mod decoder;
pub mod encoder;

use std::fmt;

use crate::http::method::{UnknownMethod, Version};
use crate::http::status::StatusCode;

pub use chunked::{ChunkDecoder, ChunkEvent};
pub use decoder::{DecoderLimits, RequestDecoder};
pub use encoder::{write_continue, write_response, EncodeError, ResponseWriter, WriteOptions};

/// Which bound a request exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    HeaderCount,
    HeaderBytes,
    Body,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::HeaderCount => f.write_str("too many headers"),
            Limit::HeaderBytes => f.write_str("header block too large"),
            Limit::Body => f.write_str("body too large"),
        }
    }
}

/// A request that cannot be decoded. Always answered with 400.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line")]
    MalformedStartLine,

    #[error("malformed header field")]
    MalformedHeader,

    #[error("unsupported protocol version")]
    UnsupportedVersion,

    #[error("request too large: {0}")]
    RequestTooLarge(Limit),

    #[error("invalid Content-Length")]
    InvalidContentLength,

    #[error("both Content-Length and Transfer-Encoding present")]
    ConflictingFraming,

    #[error("unsupported transfer coding `{0}`")]
    UnsupportedTransferEncoding(String),

    #[error("invalid chunked encoding: {0}")]
    InvalidChunk(&'static str),

    #[error("{method}")]
    UnknownMethod {
        method: UnknownMethod,
        version: Version,
        keep_alive: bool,
    },
}

impl ParseError {
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    /// Whether the offending message was fully consumed, leaving the
    /// connection positioned at the next request.
    pub fn keeps_framing(&self) -> bool {
        matches!(self, ParseError::UnknownMethod { .. })
    }

    /// How to write the 400 for this error. Only a fully framed message can
    /// leave the connection open, and then only if its head allowed it.
    pub fn reply_options(&self) -> WriteOptions {
        match self {
            ParseError::UnknownMethod {
                version,
                keep_alive,
                ..
            } => WriteOptions {
                version: *version,
                head_only: false,
                keep_alive: *keep_alive,
            },
            _ => WriteOptions {
                keep_alive: false,
                ..WriteOptions::default()
            },
        }
    }
}
