//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor and subscribing to session events.

use tokio::sync::{broadcast, mpsc, oneshot};

use ccui_core::{SessionId, SessionSnapshot};

use super::commands::{FileBatch, RegistryCommand, RegistryError, SessionEvent};

/// Handle for interacting with the registry actor.
///
/// Cheap to clone and share across tasks. All methods communicate with
/// the actor via channels; a closed channel maps to
/// `RegistryError::ChannelClosed` or a null-equivalent.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<SessionEvent>,
}

impl RegistryHandle {
    /// Creates a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Applies a tailer batch to its session.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if the registry is at capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn apply_batch(&self, batch: FileBatch) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::ApplyBatch {
                batch: Box::new(batch),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Reports that a session's log file was unlinked.
    ///
    /// Removing an unknown session is a no-op.
    pub async fn file_removed(&self, session_id: SessionId) {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::FileRemoved {
                session_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return;
        }

        let _ = rx.await;
    }

    /// Triggers a timeout recheck. Fire-and-forget.
    pub async fn recheck_timeouts(&self) {
        // Ignore send errors - actor may be shutting down
        let _ = self.sender.send(RegistryCommand::RecheckTimeouts).await;
    }

    /// Gets a single session snapshot.
    ///
    /// Returns `None` if the session doesn't exist or if communication
    /// with the actor fails.
    pub async fn get_session(&self, session_id: SessionId) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::GetSession {
                session_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Gets all session snapshots.
    ///
    /// Returns an empty vector if no sessions are registered or if
    /// communication with the actor fails.
    pub async fn get_all_sessions(&self) -> Vec<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::GetAllSessions { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Subscribes to session events.
    ///
    /// Synchronous; doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }

    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
