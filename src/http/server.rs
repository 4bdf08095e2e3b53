//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Collect routes, middleware and TLS settings before startup
//! - Provision TLS credentials and bind the listener (`bind`)
//! - Run the accept loop, one task per connection (`serve`)
//! - Drain connections on shutdown, aborting stragglers after the grace period
//!
//! # Design Decisions
//! - Registration happens on `&mut HttpServer`; once bound, the route table
//!   and middleware chain are frozen behind an `Arc`
//! - Certificate problems surface from `bind`, never from a running server
//! - Dropping a [`ServerHandle`] shuts the server down

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::certs::CertificateMaterial;
use crate::config::ServerConfig;
use crate::http::dispatch::{handle_connection, ConnectionContext};
use crate::http::handler::Handler;
use crate::http::method::Method;
use crate::http::middleware::{Middleware, Pipeline};
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::{TlsAcceptor, TlsError, TlsSource};
use crate::routing::{RouteError, Router, Scope};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
}

/// An HTTP/1.x server under construction.
pub struct HttpServer {
    config: ServerConfig,
    router: Router,
    middleware: Vec<Arc<dyn Middleware>>,
    tls: Option<TlsSource>,
}

impl HttpServer {
    /// Create a server from configuration. TLS settings in the config are
    /// used unless [`HttpServer::tls`] overrides them.
    pub fn new(config: ServerConfig) -> Self {
        let tls = config.listener.tls.as_ref().map(|tls| tls.to_source());
        Self {
            config,
            router: Router::new(),
            middleware: Vec::new(),
            tls,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn route<H: Handler>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        self.router.route(method, pattern, handler)?;
        Ok(self)
    }

    crate::routing::method_helpers!();

    pub fn nest(&mut self, prefix: &str) -> Scope<'_> {
        self.router.nest(prefix)
    }

    pub fn not_found<H: Handler>(&mut self, handler: H) -> &mut Self {
        self.router.not_found(handler);
        self
    }

    /// Append a middleware. The first one added sees the request first.
    pub fn middleware<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Serve over TLS using `source`.
    pub fn tls(&mut self, source: TlsSource) -> &mut Self {
        self.tls = Some(source);
        self
    }

    /// Resolve TLS credentials and bind the listening socket.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let (tls, certificate) = match &self.tls {
            Some(source) => {
                let (config, material) = source.resolve()?;
                (Some(TlsAcceptor::new(config)), material)
            }
            None => (None, None),
        };

        let bind_address = &self.config.listener.bind_address;
        let listener = Listener::bind(bind_address, self.config.listener.max_connections).await?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            addr: bind_address.clone(),
            source,
        })?;

        tracing::info!(
            routes = self.router.len(),
            middleware = self.middleware.len(),
            "route table frozen"
        );

        let pipeline = Pipeline::build(self.middleware, Arc::new(self.router));
        let ctx = ConnectionContext {
            pipeline,
            limits: self.config.limits.decoder_limits(),
            timeouts: self.config.timeouts.clone(),
            tls,
        };

        Ok(BoundServer {
            listener,
            local_addr,
            certificate,
            ctx: Arc::new(ctx),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        self.bind().await?.serve(shutdown).await;
        Ok(())
    }
}

/// A server whose socket is bound but which is not yet accepting.
pub struct BoundServer {
    listener: Listener,
    local_addr: SocketAddr,
    certificate: Option<CertificateMaterial>,
    ctx: Arc<ConnectionContext>,
    tracker: ConnectionTracker,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Generated or in-memory certificate, when serving over TLS with one.
    pub fn certificate(&self) -> Option<&CertificateMaterial> {
        self.certificate.as_ref()
    }

    /// Handle for rotating TLS credentials.
    pub fn tls_acceptor(&self) -> Option<&TlsAcceptor> {
        self.ctx.tls.as_ref()
    }

    /// Accept connections until `shutdown` resolves, then drain.
    pub async fn serve<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let BoundServer {
            listener,
            local_addr,
            ctx,
            tracker,
            ..
        } = self;
        tokio::pin!(shutdown);

        tracing::info!(
            address = %local_addr,
            secure = ctx.tls.is_some(),
            max_connections = listener.max_connections(),
            "HTTP server starting"
        );

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr, permit)) => {
                        let guard = tracker.track();
                        tasks.spawn(handle_connection(stream, addr, guard, permit, ctx.clone()));
                    }
                    Err(ListenerError::Closed) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => reap(joined),
            }
        }

        // Stop accepting before draining.
        drop(listener);
        tracker.start_drain();
        tracing::info!(
            active_connections = tracker.active_count(),
            "shutdown requested, draining connections"
        );

        let grace = ctx.timeouts.shutdown_grace();
        if tokio::time::timeout(grace, tracker.wait_idle()).await.is_err() {
            tracing::warn!(
                remaining = tracker.active_count(),
                grace_secs = grace.as_secs(),
                "grace period elapsed, aborting connections"
            );
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }

        tracing::info!("HTTP server stopped");
    }

    /// Serve on a background task.
    pub fn spawn(self) -> ServerHandle {
        let shutdown = Shutdown::new();
        let local_addr = self.local_addr;
        let certificate = self.certificate.clone();
        let tls = self.ctx.tls.clone();
        let tracker = self.tracker.clone();
        let task = tokio::spawn(self.serve(shutdown.signalled()));
        ServerHandle {
            shutdown,
            task,
            local_addr,
            certificate,
            tls,
            tracker,
        }
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            tracing::error!(error = %err, "connection task panicked");
        }
    }
}

/// Control handle for a server started with [`BoundServer::spawn`].
///
/// Dropping the handle triggers the same graceful shutdown as [`ServerHandle::shutdown`].
#[derive(Debug)]
pub struct ServerHandle {
    shutdown: Shutdown,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
    certificate: Option<CertificateMaterial>,
    tls: Option<TlsAcceptor>,
    tracker: ConnectionTracker,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn certificate(&self) -> Option<&CertificateMaterial> {
        self.certificate.as_ref()
    }

    pub fn tls_acceptor(&self) -> Option<&TlsAcceptor> {
        self.tls.as_ref()
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Swap in new credentials for subsequent TLS handshakes.
    ///
    /// Does nothing on a plain-text server.
    pub fn rotate_certificate(&mut self, material: CertificateMaterial) -> Result<(), TlsError> {
        if let Some(acceptor) = &self.tls {
            acceptor.rotate(material.server_config()?);
            self.certificate = Some(material);
        }
        Ok(())
    }

    /// Stop accepting, drain connections and wait for the server task.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "server task failed");
        }
    }
}
