//! Per-request access log and request metrics.

use std::time::Instant;

use futures_util::future::BoxFuture;

use crate::http::handler::HandlerResult;
use crate::http::middleware::request_id::RequestId;
use crate::http::middleware::{Middleware, Next};
use crate::http::request::Request;
use crate::observability::metrics;

/// Logs method, path, status and latency of every request.
///
/// Place after [`RequestIdMiddleware`](super::RequestIdMiddleware) to include the id.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLog;

impl Middleware for AccessLog {
    fn handle(&self, request: Request, next: Next) -> BoxFuture<'static, HandlerResult> {
        let start = Instant::now();
        let method = request.method();
        let path = request.path().to_string();
        let peer = request.peer().addr;
        let request_id = request
            .attributes()
            .get::<RequestId>()
            .map(|id| id.to_string())
            .unwrap_or_default();

        Box::pin(async move {
            let result = next.run(request).await;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            match &result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    tracing::info!(
                        request_id = %request_id,
                        %method,
                        %path,
                        peer = ?peer,
                        status,
                        latency_ms,
                        "request completed"
                    );
                    metrics::record_request(method.as_str(), status, start);
                }
                Err(err) => {
                    tracing::warn!(
                        request_id = %request_id,
                        %method,
                        %path,
                        peer = ?peer,
                        latency_ms,
                        error = %err,
                        "request failed"
                    );
                    metrics::record_request(method.as_str(), 500, start);
                }
            }
            result
        })
    }
}
