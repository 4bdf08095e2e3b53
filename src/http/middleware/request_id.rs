//! Request ID propagation.
//!
//! Reuses a well-formed incoming `x-request-id` or generates a UUID v4, stores
//! it in the request attributes and echoes it on the response.

use std::fmt;

use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::http::handler::HandlerResult;
use crate::http::headers::X_REQUEST_ID;
use crate::http::middleware::{Middleware, Next};
use crate::http::request::Request;

const MAX_LEN: usize = 128;

/// Correlation identifier for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts client-supplied ids that are short printable ASCII.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = !value.is_empty()
            && value.len() <= MAX_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdMiddleware;

impl Middleware for RequestIdMiddleware {
    fn handle(&self, mut request: Request, next: Next) -> BoxFuture<'static, HandlerResult> {
        let id = request
            .header(X_REQUEST_ID)
            .and_then(RequestId::parse)
            .unwrap_or_else(RequestId::generate);
        request.attributes_mut().insert(id.clone());

        Box::pin(async move {
            let mut response = next.run(request).await?;
            response.headers_mut().insert(X_REQUEST_ID, id.as_str());
            Ok(response)
        })
    }
}
