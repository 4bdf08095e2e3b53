//! Middleware pipeline.
//!
//! # Data Flow
//! ```text
//! Request
//!     → middleware[0] ─┐
//!     → middleware[1]  │ registration order on the way in
//!     → ...            │
//!     → terminal handler (router)
//!     ← ...            │ reverse order on the way out
//!     ← middleware[0] ─┘
//! Response
//! ```
//!
//! # Design Decisions
//! - `Next` is consumed by [`Next::run`], so the rest of the chain runs at most once
//! - Not calling `run` short-circuits: downstream stages never execute
//! - Errors travel back up as `Err(HandlerError)` until a stage turns them into a response

pub mod access_log;
pub mod error_handler;
pub mod request_id;

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::http::handler::{BoxedHandler, Handler, HandlerResult};
use crate::http::request::Request;
use crate::http::response::Reply;

pub use access_log::AccessLog;
pub use error_handler::ErrorHandler;
pub use request_id::{RequestId, RequestIdMiddleware};

/// Interceptor wrapped around handler invocation.
///
/// Implemented for every `Fn(Request, Next) -> impl Future<Output = impl Reply>`.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, request: Request, next: Next) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Reply,
{
    fn handle(&self, request: Request, next: Next) -> BoxFuture<'static, HandlerResult> {
        let fut = (self)(request, next);
        Box::pin(async move { fut.await.into_result() })
    }
}

/// The remainder of the pipeline after the current middleware.
///
/// Running it consumes it, so it cannot be run twice:
///
/// ```compile_fail
/// use webby::http::middleware::Next;
/// use webby::http::{Method, Request};
///
/// async fn twice(next: Next) {
///     let _ = next.run(Request::new(Method::Get, "/")).await;
///     let _ = next.run(Request::new(Method::Get, "/")).await;
/// }
/// ```
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    terminal: BoxedHandler,
}

impl Next {
    pub fn run(self, request: Request) -> BoxFuture<'static, HandlerResult> {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                let next = Next {
                    chain: self.chain,
                    index: self.index + 1,
                    terminal: self.terminal,
                };
                middleware.handle(request, next)
            }
            None => self.terminal.call(request),
        }
    }
}

/// Middleware chain composed with a terminal handler.
#[derive(Clone)]
pub struct Pipeline {
    chain: Arc<[Arc<dyn Middleware>]>,
    terminal: BoxedHandler,
}

impl Pipeline {
    pub fn build(middleware: Vec<Arc<dyn Middleware>>, terminal: BoxedHandler) -> Self {
        Self {
            chain: middleware.into(),
            terminal,
        }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

impl Handler for Pipeline {
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        Next {
            chain: self.chain.clone(),
            index: 0,
            terminal: self.terminal.clone(),
        }
        .run(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::http::handler::HandlerError;
    use crate::http::method::Method;
    use crate::http::response::Response;
    use crate::http::status::StatusCode;

    type Log = Arc<Mutex<Vec<String>>>;

    fn tracing_middleware(name: &'static str, log: Log) -> Arc<dyn Middleware> {
        Arc::new(move |req: Request, next: Next| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{name}-enter"));
                let result = next.run(req).await;
                log.lock().unwrap().push(format!("{name}-exit"));
                result
            }
        })
    }

    fn recording_handler(log: Log) -> BoxedHandler {
        Arc::new(move |_req: Request| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push("handler".to_string());
                "done"
            }
        })
    }

    #[tokio::test]
    async fn runs_in_order_and_unwinds_in_reverse() {
        let log: Log = Arc::default();
        let pipeline = Pipeline::build(
            vec![
                tracing_middleware("a", log.clone()),
                tracing_middleware("b", log.clone()),
            ],
            recording_handler(log.clone()),
        );

        let response = pipeline.call(Request::new(Method::Get, "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a-enter", "b-enter", "handler", "b-exit", "a-exit"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_downstream() {
        let log: Log = Arc::default();
        let deny: Arc<dyn Middleware> = Arc::new(|_req: Request, _next: Next| async move {
            Response::text(StatusCode::FORBIDDEN, "no")
        });
        let pipeline = Pipeline::build(
            vec![
                tracing_middleware("a", log.clone()),
                deny,
                tracing_middleware("c", log.clone()),
            ],
            recording_handler(log.clone()),
        );

        let response = pipeline.call(Request::new(Method::Get, "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(*log.lock().unwrap(), vec!["a-enter", "a-exit"]);
    }

    #[tokio::test]
    async fn middleware_can_modify_request_and_response() {
        #[derive(Debug)]
        struct Tenant(&'static str);

        let tag: Arc<dyn Middleware> = Arc::new(|mut req: Request, next: Next| async move {
            req.attributes_mut().insert(Tenant("acme"));
            let mut response = next.run(req).await?;
            response.headers_mut().insert("x-tagged", "yes");
            Ok::<_, HandlerError>(response)
        });
        let terminal: BoxedHandler = Arc::new(|req: Request| async move {
            req.attributes().get::<Tenant>().map(|t| t.0).unwrap_or("none").to_string()
        });

        let response = Pipeline::build(vec![tag], terminal)
            .call(Request::new(Method::Get, "/"))
            .await
            .unwrap();
        assert_eq!(response.headers().get("x-tagged"), Some("yes"));
        assert_eq!(response.body().as_bytes(), Some(&b"acme"[..]));
    }

    #[tokio::test]
    async fn errors_propagate_through_the_chain() {
        let log: Log = Arc::default();
        let failing: BoxedHandler =
            Arc::new(|_req: Request| async move { Err::<Response, _>(HandlerError::msg("broken")) });
        let pipeline = Pipeline::build(vec![tracing_middleware("a", log.clone())], failing);

        let err = pipeline.call(Request::new(Method::Get, "/")).await.unwrap_err();
        assert_eq!(err.to_string(), "broken");
        assert_eq!(*log.lock().unwrap(), vec!["a-enter", "a-exit"]);
    }

    #[tokio::test]
    async fn empty_pipeline_calls_terminal() {
        let log: Log = Arc::default();
        let pipeline = Pipeline::build(Vec::new(), recording_handler(log.clone()));
        assert!(pipeline.is_empty());
        pipeline.call(Request::new(Method::Get, "/")).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);
    }
}
