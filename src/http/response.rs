//! Response representation and conversions from handler return values.
//!
//! # Design Decisions
//! - Bodies are empty, fully buffered, or a stream of chunks
//! - Buffered bodies are framed with Content-Length, streams with chunked encoding
//! - Status codes are validated at construction (100–599)

use std::fmt;

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};

use crate::http::handler::HandlerError;
use crate::http::headers::{self, Headers};
use crate::http::status::StatusCode;

/// Response payload.
pub enum Body {
    Empty,
    Full(Bytes),
    /// Produced lazily; length unknown upfront.
    Stream(BoxStream<'static, Result<Bytes, std::io::Error>>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Empty
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        Body::Stream(stream.boxed())
    }

    /// Length when known upfront.
    pub fn len(&self) -> Option<usize> {
        match self {
            Body::Empty => Some(0),
            Body::Full(bytes) => Some(bytes.len()),
            Body::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Buffered bytes, if this is not a stream.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Empty => Some(&[]),
            Body::Full(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Full(bytes) => write!(f, "Body::Full({} bytes)", bytes.len()),
            Body::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Full(bytes)
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

/// An HTTP response produced by a handler or middleware.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Empty,
        }
    }

    /// UTF-8 text response.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header(headers::CONTENT_TYPE, "text/plain; charset=utf-8")
            .with_body(body.into())
    }

    pub fn bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::new(status).with_body(body.into())
    }

    /// Response whose body is produced chunk by chunk.
    pub fn stream<S>(status: StatusCode, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        Self::new(status).with_body(Body::stream(stream))
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_parts(self) -> (StatusCode, Headers, Body) {
        (self.status, self.headers, self.body)
    }
}

/// Values a handler may return.
pub trait Reply {
    fn into_result(self) -> Result<Response, HandlerError>;
}

impl Reply for Response {
    fn into_result(self) -> Result<Response, HandlerError> {
        Ok(self)
    }
}

/// Returning nothing means "no content".
impl Reply for () {
    fn into_result(self) -> Result<Response, HandlerError> {
        Ok(Response::no_content())
    }
}

impl Reply for &'static str {
    fn into_result(self) -> Result<Response, HandlerError> {
        Ok(Response::text(StatusCode::OK, self))
    }
}

impl Reply for String {
    fn into_result(self) -> Result<Response, HandlerError> {
        Ok(Response::text(StatusCode::OK, self))
    }
}

impl Reply for StatusCode {
    fn into_result(self) -> Result<Response, HandlerError> {
        Ok(Response::new(self))
    }
}

impl Reply for (StatusCode, &'static str) {
    fn into_result(self) -> Result<Response, HandlerError> {
        Ok(Response::text(self.0, self.1))
    }
}

impl Reply for (StatusCode, String) {
    fn into_result(self) -> Result<Response, HandlerError> {
        Ok(Response::text(self.0, self.1))
    }
}

impl<T, E> Reply for Result<T, E>
where
    T: Reply,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn into_result(self) -> Result<Response, HandlerError> {
        match self {
            Ok(value) => value.into_result(),
            Err(err) => Err(HandlerError::from_boxed(err.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_sets_content_type() {
        let response = Response::text(StatusCode::OK, "hi");
        assert_eq!(response.headers().get("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(response.body().as_bytes(), Some(&b"hi"[..]));
    }

    #[test]
    fn unit_reply_is_no_content() {
        let response = ().into_result().unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.body().is_empty());
    }

    #[test]
    fn error_reply_keeps_handler_error() {
        let result: Result<Response, HandlerError> = Err(HandlerError::msg("boom"));
        let err = result.into_result().unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn stream_body_has_no_length() {
        let chunks = futures_util::stream::iter(vec![Ok(Bytes::from_static(b"a"))]);
        let response = Response::stream(StatusCode::OK, chunks);
        assert_eq!(response.body().len(), None);
    }
}
