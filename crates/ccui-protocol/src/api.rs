//! HTTP facade request/response bodies.

use ccui_core::{LauncherId, PtyId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generic `{ success }` response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }

    pub fn failed() -> Self {
        Self { success: false }
    }
}

/// `POST /focus-iterm` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusRequest {
    #[serde(default)]
    pub search_term: Option<String>,
}

/// `POST /open-session` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionRequest {
    pub cwd: String,
    pub session_id: SessionId,
}

/// `POST /focus-or-open` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusOrOpenRequest {
    pub cwd: String,
    pub session_id: SessionId,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_agent_message: Option<String>,
}

/// Outcome of a focus-or-open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusAction {
    Focused,
    Opened,
    Failed,
}

/// `POST /focus-or-open` response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FocusOrOpenResponse {
    pub action: FocusAction,
}

/// Status of a remote machine mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountStatus {
    Mounting,
    Mounted,
    Unmounted,
    Error,
}

/// One row of `GET /machines`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInfo {
    pub name: String,
    pub mount_point: String,
    pub status: MountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /machines` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachinesResponse {
    pub machines: Vec<MachineInfo>,
}

/// One row of `GET /terminals`: the full post-image of a managed PTY.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    pub pty_id: PtyId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher_id: Option<LauncherId>,
    pub cwd: String,
    pub hostname: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub subscriber_count: usize,
    pub multiplexer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// `GET /terminals` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalsResponse {
    pub terminals: Vec<TerminalInfo>,
}

/// `POST /terminals` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalRequest {
    pub session_id: SessionId,
    pub cwd: String,
    #[serde(default)]
    pub hostname: Option<String>,
}

/// `POST /terminals` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalResponse {
    pub pty_id: PtyId,
    pub session_id: SessionId,
    pub hostname: String,
}

/// `POST /terminals/launcher` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLauncherRequest {
    #[serde(default)]
    pub hostname: Option<String>,
}

/// `POST /terminals/launcher` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLauncherResponse {
    pub pty_id: PtyId,
    pub launcher_id: LauncherId,
    pub hostname: String,
}
