//! Metrics collection.
//!
//! # Metrics
//! - `webby_requests_total` (counter): completed exchanges by method, status
//! - `webby_request_duration_seconds` (histogram): handler latency
//! - `webby_active_connections` (gauge): current connection count
//! - `webby_connections_total` (counter): accepted connections by scheme
//! - `webby_parse_errors_total` (counter): rejected request heads by reason
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Exposition is left to the embedding application

use std::time::Instant;

use metrics::{counter, gauge, histogram};

pub fn record_request(method: &str, status: u16, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    counter!(
        "webby_requests_total",
        "method" => method.clone(),
        "status" => status
    )
    .increment(1);
    histogram!("webby_request_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

pub fn connection_opened(secure: bool) {
    let scheme = if secure { "https" } else { "http" };
    counter!("webby_connections_total", "scheme" => scheme).increment(1);
    gauge!("webby_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("webby_active_connections").decrement(1.0);
}

pub fn parse_error(reason: &'static str) {
    counter!("webby_parse_errors_total", "reason" => reason).increment(1);
}

pub fn tls_handshake_failed() {
    counter!("webby_tls_handshake_failures_total").increment(1);
}
