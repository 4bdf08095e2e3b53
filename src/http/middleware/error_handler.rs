//! Converts handler errors into responses.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::http::handler::{HandlerError, HandlerResult};
use crate::http::middleware::{Middleware, Next};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::status::StatusCode;

type Render = dyn Fn(&HandlerError) -> Response + Send + Sync;

/// Catches `Err` results from downstream stages and renders them.
///
/// The default renders a bare 500 without error detail.
#[derive(Clone)]
pub struct ErrorHandler {
    render: Arc<Render>,
}

impl ErrorHandler {
    pub fn new<F>(render: F) -> Self
    where
        F: Fn(&HandlerError) -> Response + Send + Sync + 'static,
    {
        Self {
            render: Arc::new(render),
        }
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(|_| internal_error())
    }
}

impl Middleware for ErrorHandler {
    fn handle(&self, request: Request, next: Next) -> BoxFuture<'static, HandlerResult> {
        let render = self.render.clone();
        let method = request.method();
        let path = request.path().to_string();
        Box::pin(async move {
            match next.run(request).await {
                Ok(response) => Ok(response),
                Err(err) => {
                    tracing::error!(%method, %path, error = %err, "handler failed");
                    Ok(render(&err))
                }
            }
        })
    }
}

/// Generic 500 used whenever a failure reaches the client.
pub fn internal_error() -> Response {
    Response::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::http::handler::{BoxedHandler, Handler};
    use crate::http::method::Method;
    use crate::http::middleware::Pipeline;

    fn failing() -> BoxedHandler {
        Arc::new(|_req: Request| async move {
            Err::<Response, _>(HandlerError::msg("secret database password in message"))
        })
    }

    #[tokio::test]
    async fn default_hides_error_detail() {
        let pipeline = Pipeline::build(vec![Arc::new(ErrorHandler::default())], failing());
        let response = pipeline.call(Request::new(Method::Get, "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body().as_bytes(), Some(&b"Internal Server Error"[..]));
    }

    #[tokio::test]
    async fn custom_renderer_is_used() {
        let handler = ErrorHandler::new(|_| Response::text(StatusCode::SERVICE_UNAVAILABLE, "later"));
        let pipeline = Pipeline::build(vec![Arc::new(handler)], failing());
        let response = pipeline.call(Request::new(Method::Get, "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
