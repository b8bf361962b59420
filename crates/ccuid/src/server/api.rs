//! External-action HTTP facade.
//!
//! Thin request handlers over the terminal manager, mount manager, and
//! host terminal capability. Every handler returns JSON; terminal
//! failures map to structured error bodies, never to panics.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use ccui_core::PtyId;
use ccui_protocol::{
    CreateLauncherRequest, CreateLauncherResponse, CreateTerminalRequest, CreateTerminalResponse,
    FocusAction, FocusOrOpenRequest, FocusOrOpenResponse, FocusRequest, MachinesResponse,
    OpenSessionRequest, SuccessResponse, TerminalsResponse,
};

use crate::terminal::TerminalError;

use super::AppState;

/// Error body shape shared by all facade handlers.
fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn terminal_error(err: TerminalError) -> Response {
    let status = match &err {
        TerminalError::NotFound(_) | TerminalError::LauncherNotFound(_) => StatusCode::NOT_FOUND,
        TerminalError::MultiplexerMissing | TerminalError::AgentMissing => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

/// `POST /focus-iterm`
pub async fn focus_iterm(
    State(state): State<AppState>,
    Json(request): Json<FocusRequest>,
) -> Json<SuccessResponse> {
    let search = request.search_term.unwrap_or_default();
    match state.hostterm.focus(&search).await {
        Ok(true) => Json(SuccessResponse::ok()),
        Ok(false) => Json(SuccessResponse::failed()),
        Err(err) => {
            warn!(error = %err, "focus-iterm failed");
            Json(SuccessResponse::failed())
        }
    }
}

/// `POST /open-session`
pub async fn open_session(
    State(state): State<AppState>,
    Json(request): Json<OpenSessionRequest>,
) -> Json<SuccessResponse> {
    match state
        .hostterm
        .open_session(&request.cwd, &request.session_id)
        .await
    {
        Ok(opened) => Json(SuccessResponse { success: opened }),
        Err(err) => {
            warn!(error = %err, "open-session failed");
            Json(SuccessResponse::failed())
        }
    }
}

/// `POST /focus-or-open`
///
/// Focus an existing tab showing the session; open a fresh one when
/// nothing matched.
pub async fn focus_or_open(
    State(state): State<AppState>,
    Json(request): Json<FocusOrOpenRequest>,
) -> Json<FocusOrOpenResponse> {
    match state.hostterm.focus(request.session_id.short()).await {
        Ok(true) => {
            return Json(FocusOrOpenResponse {
                action: FocusAction::Focused,
            })
        }
        Ok(false) => {}
        Err(err) => {
            warn!(error = %err, "focus attempt failed, trying open");
        }
    }

    match state
        .hostterm
        .open_session(&request.cwd, &request.session_id)
        .await
    {
        Ok(true) => Json(FocusOrOpenResponse {
            action: FocusAction::Opened,
        }),
        _ => Json(FocusOrOpenResponse {
            action: FocusAction::Failed,
        }),
    }
}

/// `GET /machines`
pub async fn machines(State(state): State<AppState>) -> Json<MachinesResponse> {
    Json(MachinesResponse {
        machines: state.mounts.statuses().await,
    })
}

/// `GET /terminals`
pub async fn list_terminals(State(state): State<AppState>) -> Json<TerminalsResponse> {
    Json(TerminalsResponse {
        terminals: state.terminals.list().await,
    })
}

/// `POST /terminals`
pub async fn create_terminal(
    State(state): State<AppState>,
    Json(request): Json<CreateTerminalRequest>,
) -> Response {
    let hostname = request.hostname.unwrap_or_else(|| state.hostname.clone());

    match state
        .terminals
        .get_or_create(
            request.session_id.clone(),
            request.cwd,
            hostname.clone(),
            false,
        )
        .await
    {
        Ok(pty) => Json(CreateTerminalResponse {
            pty_id: pty.pty_id.clone(),
            session_id: request.session_id,
            hostname,
        })
        .into_response(),
        Err(err) => terminal_error(err),
    }
}

/// `POST /terminals/launcher`
pub async fn create_launcher(
    State(state): State<AppState>,
    Json(request): Json<CreateLauncherRequest>,
) -> Response {
    let hostname = request.hostname.unwrap_or_else(|| state.hostname.clone());

    match state.terminals.create_launcher(hostname.clone()).await {
        Ok((pty, launcher_id)) => Json(CreateLauncherResponse {
            pty_id: pty.pty_id.clone(),
            launcher_id,
            hostname,
        })
        .into_response(),
        Err(err) => terminal_error(err),
    }
}

/// `DELETE /terminals/{pty_id}`
pub async fn delete_terminal(
    State(state): State<AppState>,
    Path(pty_id): Path<String>,
) -> Response {
    match state.terminals.kill(&PtyId::new(pty_id)).await {
        Ok(()) => Json(SuccessResponse::ok()).into_response(),
        Err(err) => terminal_error(err),
    }
}
