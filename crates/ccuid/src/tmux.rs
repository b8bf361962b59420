//! Terminal multiplexer integration.
//!
//! Every managed PTY attaches to a detached tmux session, so the agent
//! process survives daemon and browser restarts. This module wraps the
//! tmux subcommands the terminal manager needs. Every invocation goes
//! through the resolved binary with a hard wall-clock timeout; a wedged
//! tmux surfaces as `TmuxError::Timeout`, never as a hung task.
//!
//! Naming convention: `claude-<first 8 of sessionId>` for agent
//! sessions, `launcher-<first 8 of launcherId>` for launchers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use ccui_core::{LauncherId, SessionId};

/// Wall-clock timeout for every tmux invocation.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of agent multiplexer sessions.
pub const SESSION_PREFIX: &str = "claude-";

/// Prefix of launcher multiplexer sessions.
pub const LAUNCHER_PREFIX: &str = "launcher-";

/// Errors from multiplexer operations.
#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("tmux binary not found on PATH")]
    NotInstalled,

    #[error("tmux {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("tmux {command} timed out")]
    Timeout { command: String },

    #[error("failed to run tmux: {0}")]
    Spawn(std::io::Error),
}

/// Resolved tmux binary.
#[derive(Debug, Clone)]
pub struct Multiplexer {
    binary: PathBuf,
}

impl Multiplexer {
    /// Resolves tmux on PATH.
    pub fn resolve() -> Result<Self, TmuxError> {
        let binary = which::which("tmux").map_err(|_| TmuxError::NotInstalled)?;
        Ok(Self { binary })
    }

    /// Returns the resolved binary path.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Multiplexer session name for an agent session.
    pub fn session_name(session_id: &SessionId) -> String {
        format!("{SESSION_PREFIX}{}", session_id.short())
    }

    /// Multiplexer session name for a launcher.
    pub fn launcher_name(launcher_id: &LauncherId) -> String {
        format!("{LAUNCHER_PREFIX}{}", launcher_id.short())
    }

    /// Checks whether a detached session exists.
    pub async fn has_session(&self, name: &str) -> Result<bool, TmuxError> {
        let output = self.run(&["has-session", "-t", name]).await;
        match output {
            Ok(_) => Ok(true),
            // has-session exits non-zero when the session is absent
            Err(TmuxError::CommandFailed { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// Creates a detached session running `command` in `cwd`.
    pub async fn new_session(&self, name: &str, cwd: &str, command: &str) -> Result<(), TmuxError> {
        self.run(&["new-session", "-d", "-s", name, "-c", cwd, command])
            .await?;
        debug!(session = name, cwd, "Created multiplexer session");
        Ok(())
    }

    /// Renames a session (launcher reconciliation).
    pub async fn rename_session(&self, old: &str, new: &str) -> Result<(), TmuxError> {
        self.run(&["rename-session", "-t", old, new]).await?;
        debug!(from = old, to = new, "Renamed multiplexer session");
        Ok(())
    }

    /// The argv the PTY runs to attach to a session.
    pub fn attach_args(&self, name: &str) -> Vec<String> {
        vec![
            self.binary.to_string_lossy().to_string(),
            "attach-session".to_string(),
            "-t".to_string(),
            name.to_string(),
        ]
    }

    /// Maps pane shell PIDs to pane IDs across every session.
    ///
    /// The terminal manager matches these shells against an agent
    /// process's ancestry to decide whether that agent already lives in
    /// a pane. An empty server (no sessions yet) is not an error and
    /// yields an empty map.
    pub async fn pane_shell_pids(&self) -> Result<HashMap<u32, String>, TmuxError> {
        let output = match self
            .run(&["list-panes", "-a", "-F", "#{pane_pid}\t#{pane_id}"])
            .await
        {
            Ok(output) => output,
            // list-panes exits non-zero when no server is running
            Err(TmuxError::CommandFailed { .. }) => return Ok(HashMap::new()),
            Err(other) => return Err(other),
        };

        Ok(parse_pane_shells(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, TmuxError> {
        let command_label = args.first().copied().unwrap_or("").to_string();

        let result = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new(&self.binary).args(args).output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(TmuxError::Spawn(err)),
            Err(_) => {
                warn!(command = %command_label, "tmux command timed out");
                return Err(TmuxError::Timeout {
                    command: command_label,
                });
            }
        };

        if !output.status.success() {
            return Err(TmuxError::CommandFailed {
                command: command_label,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Parses `list-panes -F "#{pane_pid}\t#{pane_id}"` output.
///
/// Lines that don't match the format (or carry a non-numeric PID) are
/// dropped; a hostile format string must not poison the whole map.
fn parse_pane_shells(stdout: &str) -> HashMap<u32, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let (pid, pane_id) = line.split_once('\t')?;
            Some((pid.trim().parse().ok()?, pane_id.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_names() {
        let id = SessionId::new("8e11bfb5-7dc2-432b-9206-928fa5c35731");
        assert_eq!(Multiplexer::session_name(&id), "claude-8e11bfb5");

        let launcher = LauncherId::new("f00dbabe-0000-1111-2222-333333333333");
        assert_eq!(Multiplexer::launcher_name(&launcher), "launcher-f00dbabe");
    }

    #[test]
    fn test_parse_pane_shells() {
        let parsed = parse_pane_shells("4021\t%0\n4055\t%1\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get(&4021).map(String::as_str), Some("%0"));
        assert_eq!(parsed.get(&4055).map(String::as_str), Some("%1"));
    }

    #[test]
    fn test_parse_pane_shells_skips_garbage() {
        let parsed = parse_pane_shells("not-a-pid\t%0\n4055\t%1\nno-tab-here\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get(&4055).map(String::as_str), Some("%1"));
    }

    #[test]
    fn test_parse_pane_shells_empty() {
        assert!(parse_pane_shells("").is_empty());
    }

    #[test]
    fn test_attach_args_shape() {
        let mux = Multiplexer {
            binary: PathBuf::from("/usr/bin/tmux"),
        };
        let args = mux.attach_args("claude-8e11bfb5");
        assert_eq!(
            args,
            vec![
                "/usr/bin/tmux".to_string(),
                "attach-session".to_string(),
                "-t".to_string(),
                "claude-8e11bfb5".to_string()
            ]
        );
    }
}
