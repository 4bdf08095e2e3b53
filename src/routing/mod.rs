//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (before the server starts):
//!     (method, "/users/{id}", handler)
//!     → pattern.rs (parse + validate segments)
//!     → router.rs (duplicate check, append in registration order)
//!
//! Incoming Request (method, path)
//!     → router.rs (scan routes, bind parameters)
//!     → Return: handler + params, NotFound, or MethodNotAllowed
//! ```
//!
//! # Design Decisions
//! - Routes are immutable at runtime
//! - No regex: literal, single-segment parameter and trailing catch-all only
//! - Deterministic: most literal segments wins, then earliest registration

pub mod pattern;
pub mod router;

pub use pattern::{PathPattern, PatternError, Segment};
pub use router::{RouteError, RouteMatch, Router, Scope};

/// Per-method shorthands for any type with a `route(method, pattern, handler)`
/// method returning `Result<&mut Self, RouteError>`.
macro_rules! method_helpers {
    () => {
        $crate::routing::method_helpers!(@one get, Get);
        $crate::routing::method_helpers!(@one post, Post);
        $crate::routing::method_helpers!(@one put, Put);
        $crate::routing::method_helpers!(@one delete, Delete);
        $crate::routing::method_helpers!(@one patch, Patch);
    };
    (@one $name:ident, $method:ident) => {
        pub fn $name<H: $crate::http::handler::Handler>(
            &mut self,
            pattern: &str,
            handler: H,
        ) -> Result<&mut Self, $crate::routing::RouteError> {
            self.route($crate::http::method::Method::$method, pattern, handler)
        }
    };
}

pub(crate) use method_helpers;
