//! Launcher flow: interactive directory picker producing a fresh agent
//! session.
//!
//! A launcher writes a short picker script, runs it in a detached
//! multiplexer session, and attaches a PTY. When the picker exits, its
//! selection (read from a sentinel file) becomes the workspace of a new
//! agent session created under a placeholder id. A 10-second poll over
//! the agent's per-cwd log directory then reconciles the placeholder
//! with the log stem the agent actually minted: the multiplexer session
//! is renamed and subscribers receive `launcher_complete` with the real
//! id - or with the placeholder if the window elapses.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ccui_core::{LauncherId, SessionId};
use ccui_protocol::TerminalServerMessage;

use crate::tmux::Multiplexer;

use super::manager::{ManagedPty, TerminalError, TerminalManager};

/// How long to wait for the agent's new log stem to appear.
const RECONCILE_WINDOW: Duration = Duration::from_secs(10);

/// Poll cadence within the reconcile window.
const RECONCILE_POLL: Duration = Duration::from_millis(500);

/// Returns the sentinel file path for a launcher.
fn sentinel_path(launcher_id: &LauncherId) -> PathBuf {
    PathBuf::from(format!("/tmp/launcher_{launcher_id}"))
}

/// Returns the picker script path for a launcher.
fn script_path(launcher_id: &LauncherId) -> PathBuf {
    PathBuf::from(format!("/tmp/launcher_script_{launcher_id}.sh"))
}

/// Maps a working directory to the agent's per-cwd log directory
/// (`~/.claude/projects/<cwd with separators replaced>`).
pub fn project_dir_for_cwd(cwd: &str) -> PathBuf {
    let escaped = cwd.replace('/', "-");
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
    home.join(".claude").join("projects").join(escaped)
}

/// Lists the session log stems currently present in a project dir.
fn list_stems(project_dir: &Path) -> HashSet<String> {
    let mut stems = HashSet::new();
    let Ok(entries) = std::fs::read_dir(project_dir) else {
        return stems;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.starts_with("agent-") {
            continue;
        }
        stems.insert(stem.to_string());
    }
    stems
}

/// Picks the stem present now that was absent from the baseline.
fn new_stem(baseline: &HashSet<String>, current: &HashSet<String>) -> Option<String> {
    current.difference(baseline).next().cloned()
}

/// Picker script: fzf over directories when available, plain prompt
/// otherwise. The selection lands in the sentinel file.
fn picker_script(launcher_id: &LauncherId) -> String {
    let sentinel = sentinel_path(launcher_id);
    format!(
        r#"#!/bin/sh
SENTINEL="{sentinel}"
rm -f "$SENTINEL"
if command -v fzf >/dev/null 2>&1; then
    DIR=$(find "$HOME" -maxdepth 4 -type d -not -path '*/.*' 2>/dev/null | fzf --prompt='workspace> ')
else
    printf 'workspace directory: '
    read -r DIR
fi
if [ -n "$DIR" ]; then
    printf '%s' "$DIR" > "$SENTINEL"
fi
"#,
        sentinel = sentinel.display()
    )
}

impl TerminalManager {
    /// Creates a launcher: picker script, detached multiplexer session,
    /// attached PTY.
    pub async fn create_launcher(
        &self,
        hostname: String,
    ) -> Result<(Arc<ManagedPty>, LauncherId), TerminalError> {
        let launcher_id = LauncherId::new(uuid::Uuid::new_v4().to_string());
        let name = Multiplexer::launcher_name(&launcher_id);

        let script = script_path(&launcher_id);
        std::fs::write(&script, picker_script(&launcher_id))
            .map_err(|e| TerminalError::Launcher(format!("cannot write picker script: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755));
        }

        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        let command = format!("sh {}", script.display());

        let mut maps = self.inner.ptys.lock().await;
        {
            let multiplexer = self
                .inner
                .multiplexer
                .as_ref()
                .ok_or(TerminalError::MultiplexerMissing)?;
            multiplexer
                .new_session(&name, &home.to_string_lossy(), &command)
                .await?;
        }

        // The placeholder session id is never published; it exists so
        // the PTY has an identity until the picker resolves.
        let placeholder = SessionId::new(format!("launcher-pending-{}", launcher_id.short()));
        let pty = self.spawn_attached_pty(
            &mut maps,
            placeholder,
            Some(launcher_id.clone()),
            name,
            home.to_string_lossy().to_string(),
            hostname,
            None,
        )?;

        info!(launcher_id = %launcher_id, pty_id = %pty.pty_id, "Launcher created");
        Ok((pty, launcher_id))
    }
}

/// Continues a launcher whose picker PTY exited.
///
/// Runs on the pump task after the launcher PTY left the maps.
pub(crate) async fn complete_launcher(
    manager: TerminalManager,
    launcher_pty: Arc<ManagedPty>,
    launcher_id: LauncherId,
) {
    let (subscribers, hostname) = {
        let mut state = launcher_pty.state.lock().await;
        let subscribers: Vec<mpsc::Sender<TerminalServerMessage>> =
            state.subscribers.drain().map(|(_, tx)| tx).collect();
        (subscribers, launcher_pty.hostname.clone())
    };

    let script = script_path(&launcher_id);
    let sentinel = sentinel_path(&launcher_id);
    let selection = std::fs::read_to_string(&sentinel).ok();
    let _ = std::fs::remove_file(&script);
    let _ = std::fs::remove_file(&sentinel);

    // No selection: the picker was cancelled. Propagate the exit.
    let Some(selection) = selection.filter(|s| !s.trim().is_empty()) else {
        debug!(launcher_id = %launcher_id, "Launcher exited without a selection");
        for sender in &subscribers {
            let _ = sender
                .send(TerminalServerMessage::Exit {
                    code: Some(0),
                    signal: None,
                })
                .await;
        }
        return;
    };

    // A file selection resolves to its parent directory.
    let selected = PathBuf::from(selection.trim());
    let workspace = if selected.is_file() {
        selected
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(selected)
    } else {
        selected
    };
    let workspace = workspace.to_string_lossy().to_string();

    // Baseline the log stems before the agent starts so the freshly
    // minted one is identifiable.
    let project_dir = project_dir_for_cwd(&workspace);
    let baseline = list_stems(&project_dir);

    let placeholder = SessionId::new(uuid::Uuid::new_v4().to_string());
    let pty = match manager
        .get_or_create(placeholder.clone(), workspace.clone(), hostname, true)
        .await
    {
        Ok(pty) => pty,
        Err(err) => {
            warn!(launcher_id = %launcher_id, error = %err, "Launcher session creation failed");
            for sender in &subscribers {
                let _ = sender
                    .send(TerminalServerMessage::Error {
                        message: err.to_string(),
                    })
                    .await;
                let _ = sender
                    .send(TerminalServerMessage::Exit {
                        code: None,
                        signal: None,
                    })
                    .await;
            }
            return;
        }
    };

    // Carry the launcher's subscribers over to the agent PTY and keep
    // the launcher id addressable for reconnects.
    {
        let mut state = pty.state.lock().await;
        state.launcher_id = Some(launcher_id.clone());
        for sender in subscribers {
            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;
            state.subscribers.insert(id, sender);
        }
    }
    {
        let mut maps = manager.inner.ptys.lock().await;
        maps.by_launcher
            .insert(launcher_id.clone(), pty.pty_id.clone());
    }

    // Watch for the agent's new log stem and reconcile.
    let resolved = wait_for_new_stem(&project_dir, &baseline).await;

    let final_id = match resolved {
        Some(stem) => {
            let real_id = SessionId::new(stem);
            let old_name = Multiplexer::session_name(&placeholder);
            let new_name = Multiplexer::session_name(&real_id);

            if let Some(multiplexer) = manager.inner.multiplexer.as_ref() {
                if let Err(err) = multiplexer.rename_session(&old_name, &new_name).await {
                    warn!(error = %err, "Failed to rename multiplexer session");
                }
            }

            {
                let mut maps = manager.inner.ptys.lock().await;
                maps.by_session.remove(&placeholder);
                maps.by_session.insert(real_id.clone(), pty.pty_id.clone());
            }
            {
                let mut state = pty.state.lock().await;
                state.session_id = real_id.clone();
                state.multiplexer_name = new_name;
            }

            info!(
                launcher_id = %launcher_id,
                session_id = %real_id,
                "Launcher reconciled with agent session"
            );
            real_id
        }
        None => {
            warn!(
                launcher_id = %launcher_id,
                "No new log stem within the reconcile window, keeping placeholder"
            );
            placeholder
        }
    };

    let message = TerminalServerMessage::LauncherComplete {
        session_id: final_id,
        pty_id: pty.pty_id.clone(),
        cwd: workspace,
    };
    let state = pty.state.lock().await;
    for sender in state.subscribers.values() {
        let _ = sender.try_send(message.clone());
    }
}

/// Polls the project dir for a stem absent from the baseline.
async fn wait_for_new_stem(project_dir: &Path, baseline: &HashSet<String>) -> Option<String> {
    let deadline = tokio::time::Instant::now() + RECONCILE_WINDOW;
    loop {
        let current = list_stems(project_dir);
        if let Some(stem) = new_stem(baseline, &current) {
            return Some(stem);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(RECONCILE_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_project_dir_encoding() {
        let dir = project_dir_for_cwd("/home/user/code/project");
        assert!(dir
            .to_string_lossy()
            .ends_with(".claude/projects/-home-user-code-project"));
    }

    #[test]
    fn test_sentinel_and_script_paths() {
        let id = LauncherId::new("f00dbabe-1111");
        assert_eq!(
            sentinel_path(&id),
            PathBuf::from("/tmp/launcher_f00dbabe-1111")
        );
        assert_eq!(
            script_path(&id),
            PathBuf::from("/tmp/launcher_script_f00dbabe-1111.sh")
        );
    }

    #[test]
    fn test_picker_script_mentions_sentinel() {
        let id = LauncherId::new("abc");
        let script = picker_script(&id);
        assert!(script.contains("/tmp/launcher_abc"));
        assert!(script.starts_with("#!/bin/sh"));
    }

    #[test]
    fn test_list_stems_skips_subagents() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("abc.jsonl"), "{}").unwrap();
        fs::write(dir.path().join("agent-x.jsonl"), "{}").unwrap();
        fs::write(dir.path().join("readme.md"), "").unwrap();

        let stems = list_stems(dir.path());
        assert_eq!(stems.len(), 1);
        assert!(stems.contains("abc"));
    }

    #[test]
    fn test_new_stem_detection() {
        let baseline: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        let mut current = baseline.clone();
        assert_eq!(new_stem(&baseline, &current), None);

        current.insert("xyz".to_string());
        assert_eq!(new_stem(&baseline, &current), Some("xyz".to_string()));
    }

    #[test]
    fn test_missing_project_dir_is_empty() {
        let stems = list_stems(Path::new("/nonexistent/project/dir"));
        assert!(stems.is_empty());
    }
}
