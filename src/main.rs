//! webby demo server.
//!
//! Serves a handful of demonstration routes over HTTP, or over HTTPS with a
//! freshly generated self-signed certificate when `--self-signed` is given.
//!
//! ```text
//! webby --bind 127.0.0.1:8443 --self-signed localhost
//! curl --insecure https://127.0.0.1:8443/hello/you
//! ```

use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use clap::{Parser, ValueEnum};

use webby::config::{load_config, LogFormat, ServerConfig};
use webby::http::headers::CONTENT_TYPE;
use webby::lifecycle::shutdown_signal;
use webby::observability::logging;
use webby::{
    AccessLog, ErrorHandler, HttpServer, ProvisionParams, Request, RequestIdMiddleware, Response,
    StatusCode, TlsSource,
};

#[derive(Parser)]
#[command(name = "webby")]
#[command(about = "Minimal embeddable HTTP(S) server, demo binary", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,

    /// Serve HTTPS with a self-signed certificate for this subject
    #[arg(long, value_name = "SUBJECT")]
    self_signed: Option<String>,

    /// Override observability.log_format
    #[arg(long, value_enum)]
    log_format: Option<CliLogFormat>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Pretty,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format.into();
    }

    logging::init(&config.observability.log_level, config.observability.log_format);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "webby starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        idle_secs = config.timeouts.idle_secs,
        read_secs = config.timeouts.read_secs,
        "Configuration loaded"
    );

    let started = Instant::now();
    let mut server = HttpServer::new(config);
    server
        .middleware(RequestIdMiddleware)
        .middleware(AccessLog)
        .middleware(ErrorHandler::default());

    if let Some(subject) = cli.self_signed {
        server.tls(TlsSource::self_signed(ProvisionParams::new(subject)));
    }

    server
        .get("/", |_req: Request| async move { "webby is running\n" })?
        .get("/hello/{name}", |req: Request| async move {
            format!("hello, {}\n", req.param("name").unwrap_or("stranger"))
        })?
        .post("/echo", |req: Request| async move {
            let content_type = req
                .header(CONTENT_TYPE)
                .unwrap_or("application/octet-stream")
                .to_string();
            Response::bytes(StatusCode::OK, req.body().clone()).with_header(CONTENT_TYPE, content_type)
        })?
        .get("/status", move |req: Request| async move {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let body = serde_json::json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": started.elapsed().as_secs(),
                "unix_time": now,
                "secure": req.peer().secure,
            });
            Response::bytes(StatusCode::OK, body.to_string())
                .with_header(CONTENT_TYPE, "application/json")
        })?;

    server.nest("/files").get("/{*path}", |req: Request| async move {
        format!("would serve `{}`\n", req.param("path").unwrap_or_default())
    })?;

    let bound = server.bind().await?;
    if let Some(material) = bound.certificate() {
        tracing::info!(
            subject = material.subject(),
            serial = %material.serial_hex(),
            not_after = ?material.not_after(),
            "serving with self-signed certificate"
        );
    }
    tracing::info!(address = %bound.local_addr(), "Listening for connections");

    bound.serve(shutdown_signal()).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
