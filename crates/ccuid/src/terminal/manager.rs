//! Managed PTY attachments to detached multiplexer sessions.
//!
//! Every PTY the daemon owns runs `tmux attach-session` against a
//! detached session hosting the agent CLI, so the agent survives daemon
//! and browser restarts. Output bytes fan out to all subscribed
//! WebSocket connections and into a bounded scrollback ring; killing a
//! PTY only detaches - the multiplexer session and the agent persist.
//!
//! # Locking
//!
//! The id maps are guarded by one lock and mutated only on
//! create/kill/rename. Per-PTY state (ring, subscribers, writer) sits
//! behind its own lock; the broadcast path uses non-blocking sends so a
//! slow subscriber can never stall the PTY pump.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ccui_core::{LauncherId, PtyId, SessionId};
use ccui_protocol::{TerminalInfo, TerminalServerMessage};

use crate::procscan::find_outside_instance;
use crate::tmux::{Multiplexer, TmuxError};

use super::ring::OutputRing;

/// Outbound buffer per subscriber; overflow drops frames (the ring
/// replays them on reconnect).
const SUBSCRIBER_BUFFER: usize = 256;

/// Idle reclamation sweep interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A PTY with no input or output for this long is reclaimed.
pub const IDLE_KILL_AFTER: Duration = Duration::from_secs(2 * 60 * 60);

/// Default PTY geometry until the client sends a resize.
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

/// Errors from terminal operations.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("terminal multiplexer not available: install tmux to use terminals")]
    MultiplexerMissing,

    #[error("agent CLI not found on PATH")]
    AgentMissing,

    #[error(transparent)]
    Multiplexer(#[from] TmuxError),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("terminal not found: {0}")]
    NotFound(PtyId),

    #[error("launcher not found: {0}")]
    LauncherNotFound(LauncherId),

    #[error("launcher failed: {0}")]
    Launcher(String),
}

// ============================================================================
// Managed PTY
// ============================================================================

pub(crate) struct PtyState {
    pub session_id: SessionId,
    pub launcher_id: Option<LauncherId>,
    pub multiplexer_name: String,
    pub warning: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub ring: OutputRing,
    pub subscribers: HashMap<u64, mpsc::Sender<TerminalServerMessage>>,
    pub next_subscriber_id: u64,
    pub writer: Option<Box<dyn Write + Send>>,
    pub master: Option<Box<dyn MasterPty + Send>>,
    pub child: Option<Box<dyn Child + Send + Sync>>,
}

/// One PTY attachment to a multiplexer session.
pub struct ManagedPty {
    pub pty_id: PtyId,
    pub cwd: String,
    pub hostname: String,
    pub created_at: DateTime<Utc>,
    pub(crate) is_launcher: bool,
    pub(crate) state: Mutex<PtyState>,
}

impl ManagedPty {
    /// Current session id (changes once when a launcher reconciles).
    pub async fn session_id(&self) -> SessionId {
        self.state.lock().await.session_id.clone()
    }

    /// Builds the `attached` handshake message for a new subscriber.
    pub(crate) fn attached_message(&self, state: &PtyState) -> TerminalServerMessage {
        TerminalServerMessage::Attached {
            pty_id: self.pty_id.clone(),
            session_id: state.session_id.clone(),
            multiplexer_name: state.multiplexer_name.clone(),
            warning: state.warning.clone(),
        }
    }

    fn info(&self, state: &PtyState) -> TerminalInfo {
        TerminalInfo {
            pty_id: self.pty_id.clone(),
            session_id: if self.is_launcher && state.launcher_id.is_some() {
                None
            } else {
                Some(state.session_id.clone())
            },
            launcher_id: state.launcher_id.clone(),
            cwd: self.cwd.clone(),
            hostname: self.hostname.clone(),
            created_at: self.created_at,
            last_activity_at: state.last_activity_at,
            subscriber_count: state.subscribers.len(),
            multiplexer_name: state.multiplexer_name.clone(),
            warning: state.warning.clone(),
        }
    }
}

/// A live subscription to a PTY's output.
pub struct SubscriberHandle {
    pub subscriber_id: u64,
    pub receiver: mpsc::Receiver<TerminalServerMessage>,
    /// The handshake message, sent first.
    pub attached: TerminalServerMessage,
    /// Scrollback replay, sent second (empty ring yields `None`).
    pub replay: Option<TerminalServerMessage>,
}

// ============================================================================
// Terminal Manager
// ============================================================================

#[derive(Default)]
pub(crate) struct PtyMaps {
    pub by_id: HashMap<PtyId, Arc<ManagedPty>>,
    pub by_session: HashMap<SessionId, PtyId>,
    pub by_launcher: HashMap<LauncherId, PtyId>,
}

pub(crate) struct ManagerInner {
    pub multiplexer: Option<Multiplexer>,
    pub agent_bin: Option<PathBuf>,
    pub ptys: Mutex<PtyMaps>,
    pub cancel: CancellationToken,
}

/// Owner of all managed PTYs. Cheap to clone.
#[derive(Clone)]
pub struct TerminalManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl TerminalManager {
    /// Creates the manager, resolving the multiplexer and agent CLI.
    ///
    /// Either binary missing disables terminal features with a one-line
    /// notice; the daemon keeps running everything else.
    pub fn new(cancel: CancellationToken) -> Self {
        let multiplexer = match Multiplexer::resolve() {
            Ok(mux) => Some(mux),
            Err(err) => {
                warn!(error = %err, "Terminal features disabled");
                None
            }
        };
        let agent_bin = match which::which("claude") {
            Ok(path) => Some(path),
            Err(_) => {
                warn!("Agent CLI not found on PATH, terminal creation disabled");
                None
            }
        };

        let manager = Self {
            inner: Arc::new(ManagerInner {
                multiplexer,
                agent_bin,
                ptys: Mutex::new(PtyMaps::default()),
                cancel,
            }),
        };
        manager.spawn_sweep_task();
        manager
    }

    /// True when the multiplexer binary was found.
    pub fn multiplexer_available(&self) -> bool {
        self.inner.multiplexer.is_some()
    }

    fn multiplexer(&self) -> Result<&Multiplexer, TerminalError> {
        self.inner
            .multiplexer
            .as_ref()
            .ok_or(TerminalError::MultiplexerMissing)
    }

    fn agent_bin(&self) -> Result<&PathBuf, TerminalError> {
        self.inner
            .agent_bin
            .as_ref()
            .ok_or(TerminalError::AgentMissing)
    }

    // ========================================================================
    // Attach / Create
    // ========================================================================

    /// Returns the PTY for `session_id`, creating the multiplexer
    /// session and the attachment as needed.
    ///
    /// An existing in-process PTY is returned as-is. An existing
    /// multiplexer session is re-attached (daemon restart). Otherwise a
    /// fresh detached session is created running the agent CLI with
    /// `--resume <session_id>` unless `force_new` is set.
    pub async fn get_or_create(
        &self,
        session_id: SessionId,
        cwd: String,
        hostname: String,
        force_new: bool,
    ) -> Result<Arc<ManagedPty>, TerminalError> {
        // Hold the maps lock for the whole sequence so concurrent
        // requests for the same session cannot double-create.
        let mut maps = self.inner.ptys.lock().await;

        if let Some(pty_id) = maps.by_session.get(&session_id) {
            if let Some(existing) = maps.by_id.get(pty_id) {
                return Ok(Arc::clone(existing));
            }
        }

        let multiplexer = self.multiplexer()?.clone();
        let agent_bin = self.agent_bin()?.clone();
        let name = Multiplexer::session_name(&session_id);

        if !multiplexer.has_session(&name).await? {
            let agent = agent_bin.to_string_lossy();
            let command = if force_new {
                agent.to_string()
            } else {
                format!("{agent} --resume {session_id}")
            };
            multiplexer.new_session(&name, &cwd, &command).await?;
            info!(session = %name, cwd = %cwd, "Created agent multiplexer session");
        } else {
            debug!(session = %name, "Re-attaching to existing multiplexer session");
        }

        // An agent instance outside the multiplexer in the same cwd
        // desynchronizes input; surface it as a non-fatal warning. The
        // pane map comes from the timed multiplexer call; if that fails
        // the probe is skipped rather than mislabeling every process as
        // outside.
        let warning = match multiplexer.pane_shell_pids().await {
            Ok(pane_shells) => {
                let probe_cwd = cwd.clone();
                tokio::task::spawn_blocking(move || {
                    find_outside_instance(&probe_cwd, &pane_shells)
                })
                .await
                .ok()
                .flatten()
                .map(|proc| {
                    format!(
                        "agent CLI already running outside the multiplexer in {} (pid {}); \
                         close it to keep terminal input synchronized",
                        cwd, proc.pid
                    )
                })
            }
            Err(err) => {
                debug!(error = %err, "Pane listing failed, skipping outside-instance probe");
                None
            }
        };

        let pty = self.spawn_attached_pty(
            &mut maps,
            session_id,
            None,
            name,
            cwd,
            hostname,
            warning,
        )?;
        Ok(pty)
    }

    /// Spawns a PTY running `tmux attach-session` and registers it.
    ///
    /// Caller holds the maps lock.
    pub(crate) fn spawn_attached_pty(
        &self,
        maps: &mut PtyMaps,
        session_id: SessionId,
        launcher_id: Option<LauncherId>,
        multiplexer_name: String,
        cwd: String,
        hostname: String,
        warning: Option<String>,
    ) -> Result<Arc<ManagedPty>, TerminalError> {
        let multiplexer = self.multiplexer()?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::Pty(e.to_string()))?;

        let attach = multiplexer.attach_args(&multiplexer_name);
        let Some((program, args)) = attach.split_first() else {
            return Err(TerminalError::Pty("empty attach command".to_string()));
        };
        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(&cwd);
        cmd.env(
            "TERM",
            std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string()),
        );

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::Pty(e.to_string()))?;
        // Communicate only through the master from here on
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::Pty(e.to_string()))?;

        let pty_id = PtyId::new(uuid::Uuid::new_v4().to_string());
        let now = Utc::now();
        let is_launcher = launcher_id.is_some();

        let pty = Arc::new(ManagedPty {
            pty_id: pty_id.clone(),
            cwd,
            hostname,
            created_at: now,
            is_launcher,
            state: Mutex::new(PtyState {
                session_id: session_id.clone(),
                launcher_id: launcher_id.clone(),
                multiplexer_name,
                warning,
                last_activity_at: now,
                ring: OutputRing::new(),
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
                writer: Some(writer),
                master: Some(pair.master),
                child: Some(child),
            }),
        });

        maps.by_id.insert(pty_id.clone(), Arc::clone(&pty));
        maps.by_session.insert(session_id, pty_id.clone());
        if let Some(launcher_id) = launcher_id {
            maps.by_launcher.insert(launcher_id, pty_id.clone());
        }

        // Blocking reader thread feeds the async pump through a channel.
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if chunk_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if e.kind() != std::io::ErrorKind::Interrupted {
                            break;
                        }
                    }
                }
            }
        });

        self.spawn_pump(Arc::clone(&pty), chunk_rx);

        info!(pty_id = %pty_id, "PTY attached");
        Ok(pty)
    }

    /// Pump task: every PTY byte goes to the ring and to all open
    /// subscribers. Per-subscriber sends never block; a full or closed
    /// channel drops the frame or the subscriber respectively.
    fn spawn_pump(&self, pty: Arc<ManagedPty>, mut chunk_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        let manager = self.clone();
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    chunk = chunk_rx.recv() => {
                        let Some(chunk) = chunk else {
                            // EOF: the attach process exited
                            manager.handle_pty_exit(&pty).await;
                            break;
                        };

                        let data = String::from_utf8_lossy(&chunk).to_string();
                        let mut state = pty.state.lock().await;
                        state.last_activity_at = Utc::now();
                        state.ring.extend(&chunk);

                        let mut closed = Vec::new();
                        for (id, sender) in &state.subscribers {
                            match sender.try_send(TerminalServerMessage::Output {
                                data: data.clone(),
                            }) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    // Lagging client: drop the frame, the
                                    // ring replays on reconnect
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    closed.push(*id);
                                }
                            }
                        }
                        for id in closed {
                            state.subscribers.remove(&id);
                        }
                    }
                }
            }
        });
    }

    /// Handles the attach process exiting: notify subscribers, drop the
    /// PTY, keep the multiplexer session. Launcher exits continue into
    /// the reconciliation flow.
    async fn handle_pty_exit(&self, pty: &Arc<ManagedPty>) {
        let (code, subscribers, launcher_id) = {
            let mut state = pty.state.lock().await;
            let code = state
                .child
                .as_mut()
                .and_then(|c| c.try_wait().ok().flatten())
                .map(|status| status.exit_code() as i32);
            let subscribers: Vec<_> = state.subscribers.values().cloned().collect();
            (code, subscribers, state.launcher_id.clone())
        };

        info!(pty_id = %pty.pty_id, code = ?code, "PTY exited");

        self.remove_from_maps(pty).await;

        if pty.is_launcher {
            if let Some(launcher_id) = launcher_id {
                super::launcher::complete_launcher(self.clone(), Arc::clone(pty), launcher_id)
                    .await;
                return;
            }
        }

        for sender in subscribers {
            let _ = sender
                .send(TerminalServerMessage::Exit { code, signal: None })
                .await;
        }
    }

    pub(crate) async fn remove_from_maps(&self, pty: &Arc<ManagedPty>) {
        let mut maps = self.inner.ptys.lock().await;
        maps.by_id.remove(&pty.pty_id);
        let state = pty.state.lock().await;
        if maps.by_session.get(&state.session_id) == Some(&pty.pty_id) {
            maps.by_session.remove(&state.session_id);
        }
        if let Some(launcher_id) = &state.launcher_id {
            maps.by_launcher.remove(launcher_id);
        }
    }

    // ========================================================================
    // Subscriptions and I/O
    // ========================================================================

    /// Subscribes a connection to a PTY: handshake message, full ring
    /// replay, then the live tail.
    pub async fn subscribe(&self, pty: &Arc<ManagedPty>) -> SubscriberHandle {
        let mut state = pty.state.lock().await;

        let subscriber_id = state.next_subscriber_id;
        state.next_subscriber_id += 1;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        state.subscribers.insert(subscriber_id, tx);

        let attached = pty.attached_message(&state);
        let replay = if state.ring.is_empty() {
            None
        } else {
            Some(TerminalServerMessage::Output {
                data: String::from_utf8_lossy(&state.ring.snapshot()).to_string(),
            })
        };

        debug!(
            pty_id = %pty.pty_id,
            subscriber_id,
            subscribers = state.subscribers.len(),
            "Subscriber attached"
        );

        SubscriberHandle {
            subscriber_id,
            receiver: rx,
            attached,
            replay,
        }
    }

    /// Detaches a subscriber.
    pub async fn unsubscribe(&self, pty: &Arc<ManagedPty>, subscriber_id: u64) {
        let mut state = pty.state.lock().await;
        state.subscribers.remove(&subscriber_id);
    }

    /// Writes client input to the PTY.
    pub async fn write_input(&self, pty: &Arc<ManagedPty>, data: &str) -> Result<(), TerminalError> {
        let mut state = pty.state.lock().await;
        state.last_activity_at = Utc::now();
        let Some(writer) = state.writer.as_mut() else {
            return Err(TerminalError::Pty("PTY writer closed".to_string()));
        };
        writer
            .write_all(data.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| TerminalError::Pty(e.to_string()))
    }

    /// Applies a client resize.
    pub async fn resize(
        &self,
        pty: &Arc<ManagedPty>,
        cols: u16,
        rows: u16,
    ) -> Result<(), TerminalError> {
        let state = pty.state.lock().await;
        let Some(master) = state.master.as_ref() else {
            return Err(TerminalError::Pty("PTY master closed".to_string()));
        };
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::Pty(e.to_string()))
    }

    // ========================================================================
    // Lookup / Lifecycle
    // ========================================================================

    /// Looks up a PTY by id.
    pub async fn get(&self, pty_id: &PtyId) -> Option<Arc<ManagedPty>> {
        self.inner.ptys.lock().await.by_id.get(pty_id).cloned()
    }

    /// Looks up a launcher's PTY.
    pub async fn get_by_launcher(&self, launcher_id: &LauncherId) -> Option<Arc<ManagedPty>> {
        let maps = self.inner.ptys.lock().await;
        let pty_id = maps.by_launcher.get(launcher_id)?;
        maps.by_id.get(pty_id).cloned()
    }

    /// Lists all managed PTYs.
    pub async fn list(&self) -> Vec<TerminalInfo> {
        let ptys: Vec<Arc<ManagedPty>> =
            self.inner.ptys.lock().await.by_id.values().cloned().collect();

        let mut infos = Vec::with_capacity(ptys.len());
        for pty in ptys {
            let state = pty.state.lock().await;
            infos.push(pty.info(&state));
        }
        infos
    }

    /// Kills a PTY: terminates the attach process and notifies
    /// subscribers. The multiplexer session and the agent persist.
    pub async fn kill(&self, pty_id: &PtyId) -> Result<(), TerminalError> {
        let pty = self
            .get(pty_id)
            .await
            .ok_or_else(|| TerminalError::NotFound(pty_id.clone()))?;

        self.remove_from_maps(&pty).await;

        let mut state = pty.state.lock().await;
        if let Some(child) = state.child.as_mut() {
            if let Err(err) = child.kill() {
                debug!(pty_id = %pty_id, error = %err, "PTY child already gone");
            }
        }
        for sender in state.subscribers.values() {
            let _ = sender.try_send(TerminalServerMessage::Exit {
                code: None,
                signal: Some("SIGTERM".to_string()),
            });
        }
        state.subscribers.clear();
        state.writer = None;
        state.master = None;

        info!(pty_id = %pty_id, "PTY killed (multiplexer session retained)");
        Ok(())
    }

    /// Kills every PTY (daemon shutdown). Multiplexer sessions persist.
    pub async fn kill_all(&self) {
        let ids: Vec<PtyId> = self
            .inner
            .ptys
            .lock()
            .await
            .by_id
            .keys()
            .cloned()
            .collect();
        for pty_id in ids {
            let _ = self.kill(&pty_id).await;
        }
    }

    /// Periodic idle reclamation: kill PTYs quiet for over two hours.
    fn spawn_sweep_task(&self) {
        let manager = self.clone();
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep_idle().await;
                    }
                }
            }
        });
    }

    async fn sweep_idle(&self) {
        let now = Utc::now();
        let idle_after = chrono::Duration::from_std(IDLE_KILL_AFTER)
            .unwrap_or_else(|_| chrono::Duration::hours(2));

        let ptys: Vec<Arc<ManagedPty>> =
            self.inner.ptys.lock().await.by_id.values().cloned().collect();

        for pty in ptys {
            let last_activity = pty.state.lock().await.last_activity_at;
            if now.signed_duration_since(last_activity) > idle_after {
                info!(pty_id = %pty.pty_id, "Reclaiming idle PTY");
                let _ = self.kill(&pty.pty_id).await;
            }
        }
    }
}
