//! AxoShare server binary.
//!
//! Serves a directory tree over HTTP with a directory listing, a minimal
//! upload form and optional HTTP Basic authentication. Uploads land in the
//! `uploads/` subdirectory of the served root, bounded by a folder size limit.

mod atomic;
mod auth;
mod config;
mod error;
mod etag;
mod files;
mod http;
mod listing;
mod logging;
mod multipart;
mod quota;
mod storage;
mod upload;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::get;
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::atomic::cleanup_stale_temp_files;
use crate::auth::AuthConfig;
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::http::resolve_client_ip;
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(PathBuf::from(&args.root_dir)));
    storage.ensure_layout().await?;
    match cleanup_stale_temp_files(storage.upload_dir()).await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "cleaned up interrupted uploads"),
        Err(err) => warn!(error = %err, "failed to scan upload directory for temp files"),
    }

    let auth_config = Arc::new(AuthConfig::new(args.credential()));
    let upload_config = Arc::new(UploadConfig::new(args.upload_max_size));

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);

    info!(
        root = %storage.root_path().display(),
        upload_dir = %storage.upload_dir().display(),
        auth = auth_config.is_enabled(),
        upload_max_size = args.upload_max_size,
        "configuration loaded"
    );
    info!("🚀 Starting HTTP server at http://{}", addr);

    let app = build_app(storage, auth_config, upload_config);
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
}

/// Assembles routes, the auth gate and shared configuration.
fn build_app(
    storage: Arc<Storage>,
    auth_config: Arc<AuthConfig>,
    upload_config: Arc<UploadConfig>,
) -> Router {
    Router::new()
        .route(
            "/upload",
            get(upload::upload_form)
                .post(upload::handle_upload)
                .layer(DefaultBodyLimit::disable()),
        )
        .fallback(files::serve_path)
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(storage))
        .layer(Extension(auth_config))
        .layer(Extension(upload_config))
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
