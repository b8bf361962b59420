//! Host terminal-emulator capability.
//!
//! The daemon can focus or open tabs in the user's terminal emulator
//! for "jump to session" actions. All scripting lives behind this one
//! capability with two variants; the rest of the daemon never touches
//! osascript directly.

use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use ccui_core::SessionId;

/// Wall-clock timeout for scripting calls.
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from host terminal scripting.
#[derive(Debug, Error)]
pub enum HostTermError {
    #[error("host terminal scripting failed: {0}")]
    Script(String),

    #[error("host terminal scripting timed out")]
    Timeout,
}

/// Host terminal capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostTerminal {
    /// iTerm2 on macOS, scripted via osascript.
    MacITerm,

    /// No host terminal integration; every action reports not-performed.
    Disabled,
}

impl HostTerminal {
    /// Brings a terminal tab whose contents match `search` to the
    /// front. Returns `Ok(false)` when nothing matched or the
    /// capability is disabled.
    pub async fn focus(&self, search: &str) -> Result<bool, HostTermError> {
        match self {
            Self::Disabled => Ok(false),
            Self::MacITerm => {
                let script = format!(
                    r#"tell application "iTerm2"
    activate
    repeat with w in windows
        repeat with t in tabs of w
            repeat with s in sessions of t
                if name of s contains "{}" then
                    select t
                    select w
                    return "found"
                end if
            end repeat
        end repeat
    end repeat
end tell
return "missing""#,
                    escape_applescript(search)
                );
                let output = run_osascript(&script).await?;
                Ok(output.trim() == "found")
            }
        }
    }

    /// Opens a new terminal tab in `cwd` resuming the given session.
    /// Returns `Ok(false)` when the capability is disabled.
    pub async fn open_session(
        &self,
        cwd: &str,
        session_id: &SessionId,
    ) -> Result<bool, HostTermError> {
        match self {
            Self::Disabled => Ok(false),
            Self::MacITerm => {
                let script = format!(
                    r#"tell application "iTerm2"
    activate
    tell current window
        create tab with default profile
        tell current session
            write text "cd {} && claude --resume {}"
        end tell
    end tell
end tell"#,
                    escape_applescript(cwd),
                    escape_applescript(session_id.as_str())
                );
                run_osascript(&script).await?;
                Ok(true)
            }
        }
    }
}

async fn run_osascript(script: &str) -> Result<String, HostTermError> {
    let result = tokio::time::timeout(
        SCRIPT_TIMEOUT,
        Command::new("osascript").arg("-e").arg(script).output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(HostTermError::Script(err.to_string())),
        Err(_) => {
            warn!("osascript timed out");
            return Err(HostTermError::Timeout);
        }
    };

    if !output.status.success() {
        return Err(HostTermError::Script(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    debug!("osascript completed");
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Escapes a string for embedding in an AppleScript double-quoted
/// literal.
fn escape_applescript(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_focus_is_not_performed() {
        let term = HostTerminal::Disabled;
        assert!(!term.focus("anything").await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_open_is_not_performed() {
        let term = HostTerminal::Disabled;
        let opened = term
            .open_session("/w", &SessionId::new("abc"))
            .await
            .unwrap();
        assert!(!opened);
    }

    #[test]
    fn test_applescript_escaping() {
        assert_eq!(escape_applescript(r#"a"b\c"#), r#"a\"b\\c"#);
    }
}
