//! Registry actor - owns all session state and processes commands.
//!
//! The RegistryActor is the single owner of session state in the system.
//! It receives commands via an mpsc channel and publishes events via
//! broadcast. Because all mutations for a session run on this one task,
//! the mutate-and-emit sequence is serialized and subscribers only ever
//! observe committed state.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use ccui_core::{Session, SessionId, SessionStatus};
use ccui_protocol::{NotificationKind, StatusNotification};

use super::commands::{DeletionReason, FileBatch, RegistryCommand, RegistryError, SessionEvent};
use super::Clock;

// ============================================================================
// Resource Limits
// ============================================================================

/// Maximum number of sessions the registry can hold.
pub const MAX_SESSIONS: usize = 500;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all session state.
///
/// # Ownership
///
/// The actor owns the `SessionId -> Session` map. Sessions are keyed by
/// the log file stem; one log file = one session entry.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// All state mutations happen within this single task.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Primary session storage
    sessions: HashMap<SessionId, Session>,

    /// Event publisher for the state publisher and other subscribers
    event_publisher: broadcast::Sender<SessionEvent>,

    /// Inactivity window before a session is idle
    idle_timeout: Duration,

    /// Injected clock; tests substitute a fixed one
    clock: Clock,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<SessionEvent>,
        idle_timeout: Duration,
        clock: Clock,
    ) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            event_publisher,
            idle_timeout,
            clock,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    pub(crate) fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::ApplyBatch { batch, respond_to } => {
                let result = self.handle_apply_batch(*batch);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::FileRemoved {
                session_id,
                respond_to,
            } => {
                self.handle_file_removed(session_id);
                let _ = respond_to.send(());
            }
            RegistryCommand::RecheckTimeouts => {
                self.handle_recheck_timeouts();
            }
            RegistryCommand::GetSession {
                session_id,
                respond_to,
            } => {
                let result = self.sessions.get(&session_id).map(Session::snapshot);
                let _ = respond_to.send(result);
            }
            RegistryCommand::GetAllSessions { respond_to } => {
                let result = self.sessions.values().map(Session::snapshot).collect();
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Applies a tailer batch to its session.
    ///
    /// Creates the session on first complete metadata; suppresses
    /// no-change updates; applies the supersession rule on creation.
    fn handle_apply_batch(&mut self, batch: FileBatch) -> Result<(), RegistryError> {
        let now = (self.clock)();
        let session_id = batch.session_id.clone();

        if let Some(session) = self.sessions.get_mut(&session_id) {
            // Existing session: append and re-derive.
            if batch.reset {
                debug!(session_id = %session_id, "Log file replaced, resetting entries");
                session.reset_entries();
            }

            if let Some(meta) = &batch.meta {
                if session.git_branch.is_none() {
                    session.git_branch = meta.git_branch.clone();
                }
            }

            let previous_count = session.message_count;
            session.append_entries(batch.entries, batch.byte_position);
            let previous_status = session.refresh_status(now, self.idle_timeout);

            let status_changed = session.status != previous_status;
            let grew = session.message_count > previous_count;
            if !status_changed && !grew {
                // Suppressed: nothing a subscriber can observe changed.
                return Ok(());
            }

            let notification =
                transition_notification(previous_status, session, now);
            let snapshot = session.snapshot();
            debug!(
                session_id = %session_id,
                status = %snapshot.status,
                messages = snapshot.message_count,
                "Session updated"
            );
            let _ = self.event_publisher.send(SessionEvent::Updated {
                snapshot: Box::new(snapshot),
                notification,
            });
            return Ok(());
        }

        // Unknown session: it only exists publicly once its metadata is
        // complete (cwd and start time written by the agent).
        let Some(meta) = batch.meta.as_ref().filter(|m| m.is_complete()) else {
            debug!(
                session_id = %session_id,
                "Incomplete metadata, session not yet public"
            );
            return Ok(());
        };
        let (Some(cwd), Some(started_at)) = (meta.cwd.clone(), meta.started_at) else {
            return Ok(());
        };

        if self.sessions.len() >= MAX_SESSIONS {
            warn!(
                session_id = %session_id,
                current = self.sessions.len(),
                max = MAX_SESSIONS,
                "Registry is full, rejecting session"
            );
            return Err(RegistryError::RegistryFull { max: MAX_SESSIONS });
        }

        let mut session = Session::new(session_id.clone(), batch.hostname.clone(), cwd, started_at);
        session.git_branch = meta.git_branch.clone();
        session.append_entries(batch.entries, batch.byte_position);
        session.refresh_status(now, self.idle_timeout);

        let snapshot = session.snapshot();
        self.sessions.insert(session_id.clone(), session);

        info!(
            session_id = %session_id,
            cwd = %snapshot.cwd,
            total_sessions = self.sessions.len(),
            "Session created"
        );

        let _ = self.event_publisher.send(SessionEvent::Created {
            snapshot: Box::new(snapshot),
        });

        self.apply_supersession(&session_id);

        Ok(())
    }

    /// Supersession rule: a newly created session evicts every other
    /// idle session with the same hostname and working directory.
    fn apply_supersession(&mut self, created_id: &SessionId) {
        let Some(created) = self.sessions.get(created_id) else {
            return;
        };
        let hostname = created.hostname.clone();
        let cwd = created.cwd.clone();

        let superseded: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(id, session)| {
                *id != created_id
                    && session.status == SessionStatus::Idle
                    && session.hostname == hostname
                    && session.cwd == cwd
            })
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in superseded {
            self.sessions.remove(&session_id);
            info!(
                session_id = %session_id,
                by = %created_id,
                cwd = %cwd,
                reason = %DeletionReason::Superseded,
                "Session deleted"
            );
            let _ = self.event_publisher.send(SessionEvent::Deleted {
                session_id,
                reason: DeletionReason::Superseded,
            });
        }
    }

    /// Handles unlink of a session's log file.
    fn handle_file_removed(&mut self, session_id: SessionId) {
        if self.sessions.remove(&session_id).is_none() {
            debug!(
                session_id = %session_id,
                "Unlink for unknown session, ignoring"
            );
            return;
        }

        info!(
            session_id = %session_id,
            reason = %DeletionReason::FileRemoved,
            remaining_sessions = self.sessions.len(),
            "Session deleted"
        );

        let _ = self.event_publisher.send(SessionEvent::Deleted {
            session_id,
            reason: DeletionReason::FileRemoved,
        });
    }

    /// Re-derives status for all `working` sessions against the clock.
    ///
    /// This is what makes the 500 ms fast-idle and 5 s pending-tool
    /// thresholds fire for sessions with no filesystem activity.
    fn handle_recheck_timeouts(&mut self) {
        let now = (self.clock)();
        let mut updates = Vec::new();

        for session in self.sessions.values_mut() {
            if session.status != SessionStatus::Working {
                continue;
            }
            let previous = session.refresh_status(now, self.idle_timeout);
            if session.status != previous {
                let notification = transition_notification(previous, session, now);
                updates.push((session.snapshot(), notification));
            }
        }

        for (snapshot, notification) in updates {
            debug!(
                session_id = %snapshot.session_id,
                status = %snapshot.status,
                "Timeout recheck changed status"
            );
            let _ = self.event_publisher.send(SessionEvent::Updated {
                snapshot: Box::new(snapshot),
                notification,
            });
        }
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of sessions currently registered.
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Builds the notification carried on a working -> waiting update.
fn transition_notification(
    previous: SessionStatus,
    session: &Session,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<StatusNotification> {
    if previous == SessionStatus::Working && session.status == SessionStatus::Waiting {
        Some(StatusNotification {
            kind: if session.has_pending_tool_use {
                NotificationKind::NeedsApproval
            } else {
                NotificationKind::WaitingForInput
            },
            timestamp: now,
        })
    } else {
        None
    }
}
