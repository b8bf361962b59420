//! HTTP and WebSocket servers.
//!
//! Two listeners:
//! - the stream server (`PORT`) serves `GET /sessions`, the resumable
//!   newline-delimited change stream
//! - the API server (`API_PORT`) serves the external-action HTTP facade
//!   and the `/terminal` WebSocket endpoint
//!
//! Both run until the cancellation token fires. A port that cannot be
//! bound is a fatal startup error.

pub mod api;
pub mod stream;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::hostterm::HostTerminal;
use crate::machines::MountManager;
use crate::publisher::Publisher;
use crate::registry::RegistryHandle;
use crate::terminal::TerminalManager;

/// Errors from server setup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Shared state of both servers.
#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub publisher: Arc<Publisher>,
    pub terminals: TerminalManager,
    pub mounts: Arc<MountManager>,
    pub hostterm: HostTerminal,
    /// Local host label used when a request omits `hostname`
    pub hostname: String,
}

/// Runs the stream server until cancelled.
pub async fn run_stream_server(
    addr: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let app = Router::new()
        .route("/sessions", get(stream::sessions_stream))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    serve(addr, app, cancel, "stream").await
}

/// Runs the API server until cancelled.
pub async fn run_api_server(
    addr: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let app = Router::new()
        .route("/focus-iterm", post(api::focus_iterm))
        .route("/open-session", post(api::open_session))
        .route("/focus-or-open", post(api::focus_or_open))
        .route("/machines", get(api::machines))
        .route("/terminals", get(api::list_terminals).post(api::create_terminal))
        .route("/terminals/launcher", post(api::create_launcher))
        .route("/terminals/{pty_id}", delete(api::delete_terminal))
        .route("/terminal", get(ws::terminal_ws))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    serve(addr, app, cancel, "api").await
}

async fn serve(
    addr: SocketAddr,
    app: Router,
    cancel: CancellationToken,
    label: &'static str,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    info!(addr = %addr, server = label, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(ServerError::Serve)
}
