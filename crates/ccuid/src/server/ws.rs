//! Terminal WebSocket endpoint.
//!
//! `GET /terminal?sessionId=…&cwd=…&hostname=…` attaches to (or
//! creates) a session terminal; `GET /terminal?launcherId=…&hostname=…`
//! joins a launcher previously created via `POST /terminals/launcher`.
//!
//! Close codes: 4000 for an invalid handshake, 4001 when the PTY could
//! not be created. A failed create sends `{type:"error"}` before the
//! close so the client can show a reason.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ccui_protocol::terminal::TerminalConnectParams;
use ccui_protocol::{TerminalClientMessage, TerminalServerMessage};

use crate::terminal::{ManagedPty, TerminalManager};

use super::AppState;

/// Invalid handshake parameters.
const CLOSE_INVALID_HANDSHAKE: u16 = 4000;

/// PTY attach/create failed.
const CLOSE_PTY_FAILED: u16 = 4001;

/// Upgrade handler for `/terminal`.
pub async fn terminal_ws(
    State(state): State<AppState>,
    Query(params): Query<TerminalConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, params: TerminalConnectParams) {
    // Launcher handshake: the launcher must already exist (created via
    // the HTTP facade).
    if let Some(launcher_id) = &params.launcher_id {
        let Some(pty) = state.terminals.get_by_launcher(launcher_id).await else {
            reject(
                &mut socket,
                CLOSE_INVALID_HANDSHAKE,
                "unknown launcherId; create the launcher via POST /terminals/launcher first",
            )
            .await;
            return;
        };
        run_connection(socket, state.terminals.clone(), pty).await;
        return;
    }

    // Session handshake requires sessionId and cwd.
    let (Some(session_id), Some(cwd)) = (params.session_id.clone(), params.cwd.clone()) else {
        reject(
            &mut socket,
            CLOSE_INVALID_HANDSHAKE,
            "sessionId and cwd are required",
        )
        .await;
        return;
    };
    let hostname = params.hostname.unwrap_or_else(|| state.hostname.clone());

    let pty = match state
        .terminals
        .get_or_create(session_id, cwd, hostname, false)
        .await
    {
        Ok(pty) => pty,
        Err(err) => {
            warn!(error = %err, "Terminal attach failed");
            let payload = TerminalServerMessage::Error {
                message: err.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&payload) {
                let _ = socket.send(Message::Text(json.into())).await;
            }
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_PTY_FAILED,
                    reason: "PTY create failed".into(),
                })))
                .await;
            return;
        }
    };

    run_connection(socket, state.terminals.clone(), pty).await;
}

async fn reject(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Runs one subscribed connection until either side closes.
async fn run_connection(socket: WebSocket, terminals: TerminalManager, pty: Arc<ManagedPty>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut subscription = terminals.subscribe(&pty).await;

    // Handshake, then the full scrollback replay, then the live tail.
    for message in [Some(subscription.attached.clone()), subscription.replay.take()]
        .into_iter()
        .flatten()
    {
        let Ok(json) = serde_json::to_string(&message) else {
            continue;
        };
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            terminals.unsubscribe(&pty, subscription.subscriber_id).await;
            return;
        }
    }

    // Direct channel for replies (pong) produced by the inbound loop.
    let (direct_tx, mut direct_rx) = mpsc::channel::<TerminalServerMessage>(16);

    let mut receiver = subscription.receiver;
    let send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                m = receiver.recv() => m,
                m = direct_rx.recv() => m,
            };
            let Some(message) = message else { break };
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
            // exit terminates the connection's outbound side
            if matches!(message, TerminalServerMessage::Exit { .. }) {
                break;
            }
        }
    });

    // Inbound loop: input, resize, ping.
    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(error = %err, "WebSocket receive error");
                break;
            }
        };

        let message: TerminalClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(err) => {
                debug!(error = %err, "Ignoring unparseable client message");
                continue;
            }
        };

        match message {
            TerminalClientMessage::Input { data } => {
                if let Err(err) = terminals.write_input(&pty, &data).await {
                    debug!(error = %err, "Input write failed");
                    break;
                }
            }
            TerminalClientMessage::Resize { cols, rows } => {
                if let Err(err) = terminals.resize(&pty, cols, rows).await {
                    debug!(error = %err, "Resize failed");
                }
            }
            TerminalClientMessage::Ping => {
                let _ = direct_tx.send(TerminalServerMessage::Pong).await;
            }
        }
    }

    terminals.unsubscribe(&pty, subscription.subscriber_id).await;
    send_task.abort();
    debug!(pty_id = %pty.pty_id, "Terminal connection closed");
}
