//! Daemon <-> browser terminal WebSocket messages.
//!
//! Tags are snake_case, field keys camelCase (the dashboard's contract).

use ccui_core::{LauncherId, PtyId, SessionId};
use serde::{Deserialize, Serialize};

/// Messages the browser sends to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalClientMessage {
    /// Keystrokes for the PTY.
    Input { data: String },

    /// Viewport resize.
    Resize { cols: u16, rows: u16 },

    /// Liveness probe; answered with `pong`.
    Ping,
}

/// Messages the daemon sends to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalServerMessage {
    /// PTY output bytes (UTF-8, lossy).
    Output { data: String },

    /// Sent once after subscribing, before any output.
    #[serde(rename_all = "camelCase")]
    Attached {
        pty_id: PtyId,
        session_id: SessionId,
        multiplexer_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },

    /// The PTY process exited. The multiplexer session persists.
    Exit {
        code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
    },

    /// The launcher flow finished and resolved to a session.
    #[serde(rename_all = "camelCase")]
    LauncherComplete {
        session_id: SessionId,
        pty_id: PtyId,
        cwd: String,
    },

    Pong,

    /// Fatal per-connection error, sent before a 4001 close.
    Error { message: String },
}

/// Query parameters of a terminal WebSocket handshake.
///
/// Either `session_id` + `cwd` (+ optional hostname) for a regular
/// attach, or `launcher_id` for a launcher connection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalConnectParams {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub launcher_id: Option<LauncherId>,
    #[serde(default)]
    pub hostname: Option<String>,
}
