//! Handler capability and handler failures.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::http::request::Request;
use crate::http::response::{Reply, Response};

/// Outcome of running a handler or a pipeline stage.
pub type HandlerResult = Result<Response, HandlerError>;

/// Shared, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Failure raised by application code.
///
/// Details are logged by the dispatcher and never written to the client.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::from_boxed(err.into())
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into().into())
    }

    /// Unwraps an already boxed `HandlerError` instead of nesting it.
    pub(crate) fn from_boxed(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        match err.downcast::<HandlerError>() {
            Ok(inner) => *inner,
            Err(other) => Self::Failed(other),
        }
    }
}

/// Produces a response for a request.
///
/// Implemented for every `Fn(Request) -> impl Future<Output = impl Reply>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Reply,
{
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        let fut = (self)(request);
        Box::pin(async move { fut.await.into_result() })
    }
}
