//! Remote machines: configuration and SSHFS mounts.
//!
//! `~/.claude-code-ui/machines.json` lists remote hosts whose agent log
//! roots get mounted under `~/.claude-code-ui/mounts/<name>/` and fed to
//! the tailer as additional watch roots. Mount and unmount shell out to
//! `sshfs`/`fusermount` with hard timeouts; a failed mount surfaces as a
//! per-machine error status, never as a daemon failure.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

use ccui_protocol::{MachineInfo, MountStatus};

use crate::tailer::WatchRoot;

/// Wall-clock timeout for mount/unmount commands.
const MOUNT_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote path of the agent's log root, relative to the SSH user's home.
const REMOTE_LOG_ROOT: &str = ".claude/projects";

/// Errors from mount operations.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("sshfs not installed")]
    SshfsMissing,

    #[error("mount command failed: {0}")]
    CommandFailed(String),

    #[error("mount command timed out")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One configured remote machine.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl MachineConfig {
    /// `user@host` form for ssh-style tools.
    fn ssh_target(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

/// Shape of `machines.json`.
#[derive(Debug, Clone, Default, Deserialize)]
struct MachinesFile {
    #[serde(default)]
    machines: Vec<MachineConfig>,
}

#[derive(Debug, Clone)]
struct MachineState {
    config: MachineConfig,
    status: MountStatus,
    error: Option<String>,
}

/// Owns all remote mounts.
pub struct MountManager {
    mounts_dir: PathBuf,
    state: Mutex<HashMap<String, MachineState>>,
}

impl MountManager {
    /// Loads the machine configuration.
    ///
    /// A missing file means no remote machines; a malformed file is a
    /// warning, not a failure.
    pub fn load(machines_file: &std::path::Path, mounts_dir: PathBuf) -> Self {
        let configs = match std::fs::read_to_string(machines_file) {
            Ok(raw) => match serde_json::from_str::<MachinesFile>(&raw) {
                Ok(parsed) => parsed.machines,
                Err(err) => {
                    warn!(
                        path = %machines_file.display(),
                        error = %err,
                        "Malformed machines.json, ignoring"
                    );
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        let state = configs
            .into_iter()
            .map(|config| {
                (
                    config.name.clone(),
                    MachineState {
                        config,
                        status: MountStatus::Unmounted,
                        error: None,
                    },
                )
            })
            .collect();

        Self {
            mounts_dir,
            state: Mutex::new(state),
        }
    }

    /// Mount point for a machine.
    pub fn mount_point(&self, name: &str) -> PathBuf {
        self.mounts_dir.join(name)
    }

    /// Mounts every configured machine and returns the watch roots that
    /// succeeded. Failures are recorded per machine.
    pub async fn mount_all(&self) -> Vec<WatchRoot> {
        let configs: Vec<MachineConfig> = {
            let state = self.state.lock().await;
            state.values().map(|m| m.config.clone()).collect()
        };

        let mut roots = Vec::new();
        for config in configs {
            let name = config.name.clone();
            {
                let mut state = self.state.lock().await;
                if let Some(machine) = state.get_mut(&name) {
                    machine.status = MountStatus::Mounting;
                    machine.error = None;
                }
            }

            match self.mount_one(&config).await {
                Ok(root) => {
                    info!(machine = %name, root = %root.display(), "Machine mounted");
                    let mut state = self.state.lock().await;
                    if let Some(machine) = state.get_mut(&name) {
                        machine.status = MountStatus::Mounted;
                    }
                    roots.push(WatchRoot {
                        root,
                        hostname: name,
                    });
                }
                Err(err) => {
                    warn!(machine = %name, error = %err, "Mount failed");
                    let mut state = self.state.lock().await;
                    if let Some(machine) = state.get_mut(&name) {
                        machine.status = MountStatus::Error;
                        machine.error = Some(err.to_string());
                    }
                }
            }
        }
        roots
    }

    async fn mount_one(&self, config: &MachineConfig) -> Result<PathBuf, MountError> {
        let sshfs = which::which("sshfs").map_err(|_| MountError::SshfsMissing)?;

        let mount_point = self.mount_point(&config.name);
        std::fs::create_dir_all(&mount_point)?;

        let source = format!("{}:{}", config.ssh_target(), REMOTE_LOG_ROOT);
        let mut cmd = Command::new(sshfs);
        cmd.arg(&source)
            .arg(&mount_point)
            .args(["-o", "reconnect", "-o", "ConnectTimeout=4"]);
        if let Some(port) = config.port {
            cmd.args(["-p", &port.to_string()]);
        }

        let result = tokio::time::timeout(MOUNT_TIMEOUT, cmd.output()).await;
        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(MountError::CommandFailed(err.to_string())),
            Err(_) => return Err(MountError::Timeout),
        };

        if !output.status.success() {
            return Err(MountError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(mount_point)
    }

    /// Unmounts everything (daemon shutdown). Errors are logged only.
    pub async fn unmount_all(&self) {
        let names: Vec<String> = {
            let state = self.state.lock().await;
            state
                .values()
                .filter(|m| m.status == MountStatus::Mounted)
                .map(|m| m.config.name.clone())
                .collect()
        };

        for name in names {
            let mount_point = self.mount_point(&name);
            let result = tokio::time::timeout(
                MOUNT_TIMEOUT,
                Command::new("fusermount")
                    .arg("-u")
                    .arg(&mount_point)
                    .output(),
            )
            .await;

            let unmounted = matches!(&result, Ok(Ok(output)) if output.status.success());
            if !unmounted {
                // macOS has no fusermount; fall back to umount
                let fallback = tokio::time::timeout(
                    MOUNT_TIMEOUT,
                    Command::new("umount").arg(&mount_point).output(),
                )
                .await;
                if !matches!(&fallback, Ok(Ok(output)) if output.status.success()) {
                    warn!(machine = %name, "Unmount failed");
                    continue;
                }
            }

            info!(machine = %name, "Machine unmounted");
            let mut state = self.state.lock().await;
            if let Some(machine) = state.get_mut(&name) {
                machine.status = MountStatus::Unmounted;
            }
        }
    }

    /// Snapshot for `GET /machines`.
    pub async fn statuses(&self) -> Vec<MachineInfo> {
        let state = self.state.lock().await;
        let mut infos: Vec<MachineInfo> = state
            .values()
            .map(|machine| MachineInfo {
                name: machine.config.name.clone(),
                mount_point: self.mount_point(&machine.config.name).display().to_string(),
                status: machine.status,
                error: machine.error.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}
