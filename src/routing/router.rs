//! Route table.
//!
//! # Responsibilities
//! - Register (method, pattern) → handler, rejecting duplicates and bad patterns
//! - Match a request path to the most specific route and bind its parameters
//! - Distinguish "no such path" (404) from "path exists, wrong method" (405)
//!
//! # Design Decisions
//! - Immutable once the server starts (shared behind `Arc` without locks)
//! - O(n) scan over routes; precedence is the literal segment count, then
//!   registration order
//! - `HEAD` falls back to the `GET` route of the same path

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::http::handler::{BoxedHandler, Handler, HandlerResult};
use crate::http::headers;
use crate::http::method::Method;
use crate::http::request::{PathParams, Request};
use crate::http::response::Response;
use crate::http::status::StatusCode;
use crate::routing::pattern::{split_path, PathPattern, PatternError};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no route matches the path")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<Method> },

    #[error("duplicate route {method} {pattern}")]
    Duplicate { method: Method, pattern: String },

    #[error("invalid route pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: PatternError,
    },
}

struct Route {
    method: Method,
    pattern: PathPattern,
    handler: BoxedHandler,
}

/// Successful lookup.
pub struct RouteMatch<'a> {
    pub handler: &'a BoxedHandler,
    pub params: PathParams,
    pub pattern: &'a PathPattern,
}

/// Maps (method, path pattern) to handlers.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    not_found: Option<BoxedHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<H: Handler>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        self.add(method, pattern, Arc::new(handler))
    }

    fn add(
        &mut self,
        method: Method,
        pattern: &str,
        handler: BoxedHandler,
    ) -> Result<&mut Self, RouteError> {
        let compiled = PathPattern::parse(pattern).map_err(|source| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.pattern.same_shape(&compiled))
        {
            return Err(RouteError::Duplicate {
                method,
                pattern: compiled.to_string(),
            });
        }

        tracing::debug!(%method, pattern = %compiled, "route registered");
        self.routes.push(Route {
            method,
            pattern: compiled,
            handler,
        });
        Ok(self)
    }

    crate::routing::method_helpers!();

    /// Register routes under a common path prefix.
    pub fn nest(&mut self, prefix: &str) -> Scope<'_> {
        Scope {
            router: self,
            prefix: normalize_prefix(prefix),
        }
    }

    /// Replace the default `404 Not Found` response.
    pub fn not_found<H: Handler>(&mut self, handler: H) -> &mut Self {
        self.not_found = Some(Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the route for `method` and `path`. Any query string is ignored.
    pub fn match_route(&self, method: Method, path: &str) -> Result<RouteMatch<'_>, RouteError> {
        let segments: Vec<&str> = split_path(path).collect();

        let mut best: Option<(&Route, PathParams)> = None;
        let mut fallback: Option<(&Route, PathParams)> = None;
        let mut allowed: Vec<Method> = Vec::new();

        for route in &self.routes {
            let Some(params) = route.pattern.matches(&segments) else {
                continue;
            };
            if !allowed.contains(&route.method) {
                allowed.push(route.method);
            }

            let slot = if route.method == method {
                &mut best
            } else if method == Method::Head && route.method == Method::Get {
                &mut fallback
            } else {
                continue;
            };
            let better = match &*slot {
                Some((current, _)) => {
                    route.pattern.literal_count() > current.pattern.literal_count()
                }
                None => true,
            };
            if better {
                *slot = Some((route, params));
            }
        }

        match best.or(fallback) {
            Some((route, params)) => Ok(RouteMatch {
                handler: &route.handler,
                params,
                pattern: &route.pattern,
            }),
            None if allowed.is_empty() => Err(RouteError::NotFound),
            None => {
                if allowed.contains(&Method::Get) && !allowed.contains(&Method::Head) {
                    allowed.push(Method::Head);
                }
                allowed.sort_by_key(|m| Method::ALL.iter().position(|a| a == m));
                Err(RouteError::MethodNotAllowed { allowed })
            }
        }
    }
}

impl Handler for Router {
    fn call(&self, mut request: Request) -> BoxFuture<'static, HandlerResult> {
        match self.match_route(request.method(), request.path()) {
            Ok(found) => {
                let handler = found.handler.clone();
                request.set_params(found.params);
                handler.call(request)
            }
            Err(RouteError::MethodNotAllowed { allowed }) => {
                let allow = allowed
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let response = Response::text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
                    .with_header(headers::ALLOW, allow);
                Box::pin(async move { Ok(response) })
            }
            Err(_) => match &self.not_found {
                Some(handler) => handler.call(request),
                None => Box::pin(async move { Ok(Response::text(StatusCode::NOT_FOUND, "Not Found")) }),
            },
        }
    }
}

/// Registration handle that prefixes every pattern.
pub struct Scope<'r> {
    router: &'r mut Router,
    prefix: String,
}

impl Scope<'_> {
    pub fn route<H: Handler>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        let full = format!("{}/{}", self.prefix, pattern.trim_start_matches('/'));
        self.router.add(method, &full, Arc::new(handler))?;
        Ok(self)
    }

    crate::routing::method_helpers!();

    pub fn nest(&mut self, prefix: &str) -> Scope<'_> {
        Scope {
            prefix: format!("{}{}", self.prefix, normalize_prefix(prefix)),
            router: &mut *self.router,
        }
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
