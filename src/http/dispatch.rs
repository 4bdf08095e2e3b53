//! Per-connection request loop.
//!
//! # Data Flow
//! ```text
//! accepted socket
//!     → optional TLS handshake (bounded by the read timeout)
//!     → Reading: buffer bytes, RequestDecoder::decode
//!     → Dispatching: pipeline → router → handler (panics caught)
//!     → Writing: write_response
//!     → Idle (keep-alive) → Reading | Closed
//! ```
//!
//! # Design Decisions
//! - The idle timeout bounds the wait for the first byte of a request; the
//!   read timeout bounds the rest of it
//! - Only a parse error that leaves framing intact keeps the connection open
//! - Draining closes idle connections at once and busy ones after their
//!   in-flight exchange

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::Instrument;

use crate::config::TimeoutConfig;
use crate::http::codec::{write_continue, write_response, DecoderLimits, ParseError, RequestDecoder, WriteOptions};
use crate::http::handler::{Handler, HandlerError};
use crate::http::method::{Method, Version};
use crate::http::middleware::error_handler::internal_error;
use crate::http::middleware::Pipeline;
use crate::http::request::{PeerInfo, Request};
use crate::http::response::Response;
use crate::net::connection::{ConnectionGuard, ConnectionState};
use crate::net::listener::ConnectionPermit;
use crate::net::tls::TlsAcceptor;
use crate::observability::metrics;

const READ_BUFFER: usize = 8 * 1024;

/// Everything a connection task shares with its siblings.
pub(crate) struct ConnectionContext {
    pub pipeline: Pipeline,
    pub limits: DecoderLimits,
    pub timeouts: TimeoutConfig,
    pub tls: Option<TlsAcceptor>,
}

/// Why the read phase ended without a request.
enum ReadOutcome {
    Request(Request),
    Invalid(ParseError),
    Closed(&'static str),
}

/// Drive one accepted connection to completion.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    guard: ConnectionGuard,
    permit: ConnectionPermit,
    ctx: Arc<ConnectionContext>,
) {
    let secure = ctx.tls.is_some();
    let span = tracing::debug_span!("connection", connection_id = %guard.id(), peer_addr = %addr, secure);
    metrics::connection_opened(secure);

    async {
        tracing::debug!(state = ConnectionState::Accepted.as_str(), "connection open");
        let peer = PeerInfo {
            addr: Some(addr),
            connection_id: Some(guard.id()),
            secure,
        };

        match &ctx.tls {
            Some(acceptor) => match timeout(ctx.timeouts.read(), acceptor.accept(stream)).await {
                Ok(Ok(tls)) => serve(tls, peer, &guard, &ctx).await,
                Ok(Err(err)) => {
                    metrics::tls_handshake_failed();
                    tracing::debug!(error = %err, "TLS handshake failed");
                }
                Err(_) => {
                    metrics::tls_handshake_failed();
                    tracing::debug!("TLS handshake timed out");
                }
            },
            None => serve(stream, peer, &guard, &ctx).await,
        }

        tracing::debug!(state = ConnectionState::Closed.as_str(), "connection closed");
    }
    .instrument(span)
    .await;

    metrics::connection_closed();
    drop(guard);
    drop(permit);
}

async fn serve<IO>(mut io: IO, peer: PeerInfo, guard: &ConnectionGuard, ctx: &ConnectionContext)
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_BUFFER);
    let mut decoder = RequestDecoder::new(ctx.limits);
    let mut drain = guard.drain_signal();

    loop {
        let mut request = match read_request(&mut io, &mut buf, &mut decoder, &mut drain, ctx).await {
            ReadOutcome::Request(request) => request,
            ReadOutcome::Closed(reason) => {
                tracing::trace!(reason, "stopped reading");
                return;
            }
            ReadOutcome::Invalid(err) => {
                metrics::parse_error(parse_error_reason(&err));
                tracing::debug!(error = %err, "rejecting malformed request");
                let mut opts = err.reply_options();
                opts.keep_alive &= !guard.is_draining();
                let response = Response::text(err.status(), err.status().canonical_reason().unwrap_or("Bad Request"));
                match write_response(&mut io, response, opts).await {
                    Ok(true) => continue,
                    Ok(false) => return,
                    Err(err) => {
                        tracing::debug!(error = %err, "failed to write error response");
                        return;
                    }
                }
            }
        };

        tracing::trace!(state = ConnectionState::Dispatching.as_str(), method = %request.method(), target = request.target());
        request.set_peer(peer);
        let opts = WriteOptions {
            version: request.version(),
            head_only: request.method() == Method::Head,
            keep_alive: request.keep_alive(),
        };
        let response = dispatch(&ctx.pipeline, request).await;

        tracing::trace!(state = ConnectionState::Writing.as_str(), status = response.status().as_u16());
        let opts = WriteOptions {
            keep_alive: opts.keep_alive && !guard.is_draining(),
            ..opts
        };
        match write_response(&mut io, response, opts).await {
            Ok(true) => {
                tracing::trace!(state = ConnectionState::Idle.as_str());
            }
            Ok(false) => return,
            Err(err) => {
                tracing::debug!(error = %err, "failed to write response");
                return;
            }
        }
    }
}

async fn read_request<IO>(
    io: &mut IO,
    buf: &mut BytesMut,
    decoder: &mut RequestDecoder,
    drain: &mut watch::Receiver<bool>,
    ctx: &ConnectionContext,
) -> ReadOutcome
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let mut deadline: Option<Instant> = None;

    loop {
        match decoder.decode(buf) {
            Ok(Some(request)) => return ReadOutcome::Request(request),
            Ok(None) => {}
            Err(err) => return ReadOutcome::Invalid(err),
        }

        if decoder.take_continue() {
            if let Err(err) = write_continue(io, Version::Http11).await {
                tracing::debug!(error = %err, "failed to write 100 Continue");
                return ReadOutcome::Closed("write error");
            }
        }

        let idle = decoder.is_idle() && buf.is_empty();
        let read = if idle {
            if *drain.borrow() {
                return ReadOutcome::Closed("draining");
            }
            let waiting = timeout(ctx.timeouts.idle(), io.read_buf(buf));
            tokio::select! {
                result = waiting => match result {
                    Ok(read) => read,
                    Err(_) => return ReadOutcome::Closed("idle timeout"),
                },
                _ = drained(drain) => return ReadOutcome::Closed("draining"),
            }
        } else {
            let deadline = *deadline.get_or_insert_with(|| Instant::now() + ctx.timeouts.read());
            match timeout_at(deadline, io.read_buf(buf)).await {
                Ok(read) => read,
                Err(_) => return ReadOutcome::Closed("read timeout"),
            }
        };

        match read {
            Ok(0) => return ReadOutcome::Closed("eof"),
            Ok(n) => {
                if deadline.is_none() {
                    deadline = Some(Instant::now() + ctx.timeouts.read());
                }
                tracing::trace!(bytes = n, state = ConnectionState::Reading.as_str());
            }
            Err(err) => {
                tracing::debug!(error = %err, "read failed");
                return ReadOutcome::Closed("read error");
            }
        }
    }
}

async fn drained(drain: &mut watch::Receiver<bool>) {
    let _ = drain.wait_for(|draining| *draining).await;
}

/// Run the pipeline, turning uncaught errors and panics into a generic 500.
pub async fn dispatch(pipeline: &Pipeline, request: Request) -> Response {
    let outcome = AssertUnwindSafe(async move { pipeline.call(request).await })
        .catch_unwind()
        .await;

    let err = match outcome {
        Ok(Ok(response)) => return response,
        Ok(Err(err)) => err,
        Err(payload) => HandlerError::Panicked(panic_message(payload.as_ref())),
    };
    tracing::error!(error = %err, "request failed without a response");
    internal_error()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn parse_error_reason(err: &ParseError) -> &'static str {
    match err {
        ParseError::MalformedStartLine => "malformed_start_line",
        ParseError::MalformedHeader => "malformed_header",
        ParseError::UnsupportedVersion => "unsupported_version",
        ParseError::RequestTooLarge(_) => "too_large",
        ParseError::InvalidContentLength => "invalid_content_length",
        ParseError::ConflictingFraming => "conflicting_framing",
        ParseError::UnsupportedTransferEncoding(_) => "unsupported_transfer_encoding",
        ParseError::InvalidChunk(_) => "invalid_chunk",
        ParseError::UnknownMethod { .. } => "unknown_method",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::http::handler::BoxedHandler;
    use crate::http::status::StatusCode;

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let terminal: BoxedHandler = Arc::new(|_req: Request| async move {
            if true {
                panic!("boom");
            }
            "unreachable"
        });
        let pipeline = Pipeline::build(Vec::new(), terminal);
        let response = dispatch(&pipeline, Request::new(Method::Get, "/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn errors_become_internal_errors() {
        let terminal: BoxedHandler =
            Arc::new(|_req: Request| async move { Err::<Response, _>(HandlerError::msg("db down")) });
        let pipeline = Pipeline::build(Vec::new(), terminal);
        let response = dispatch(&pipeline, Request::new(Method::Get, "/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body().as_bytes(), Some(&b"Internal Server Error"[..]));
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
