//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the
//! `RegistryActor`:
//! - `RegistryCommand`: commands sent to the actor
//! - `RegistryError`: errors that can occur during registry operations
//! - `SessionEvent`: events published by the registry for subscribers
//!
//! All types are designed for async message passing and follow the
//! panic-free policy.

use ccui_core::{RawEntry, SessionId, SessionSnapshot};
use ccui_protocol::transcript::SessionMeta;
use ccui_protocol::StatusNotification;
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// File Batches
// ============================================================================

/// One tailer batch for a single log file.
///
/// Produced by the tailer after reading the file delta; applied
/// atomically by the actor.
#[derive(Debug, Clone)]
pub struct FileBatch {
    /// Session id derived from the log file stem
    pub session_id: SessionId,

    /// Host label of the watch root the file lives under
    pub hostname: String,

    /// Metadata extracted from the batch's records, if any carried it
    pub meta: Option<SessionMeta>,

    /// Newly parsed entries, in file order
    pub entries: Vec<RawEntry>,

    /// Byte offset of the last consumed line terminator
    pub byte_position: u64,

    /// True when the file was truncated or replaced: discard prior
    /// entries before applying this batch
    pub reset: bool,
}

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each request-response command uses a oneshot channel for the reply.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Apply a tailer batch to its session (creating it if complete
    /// metadata is available).
    ///
    /// # Errors
    /// - `RegistryError::RegistryFull` if at maximum capacity
    ApplyBatch {
        batch: Box<FileBatch>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// The log file behind a session was unlinked.
    ///
    /// Removing an unknown session is a no-op, not an error: unlink
    /// events arrive for files that never formed a session.
    FileRemoved {
        session_id: SessionId,
        respond_to: oneshot::Sender<()>,
    },

    /// Re-derive status for every `working` session against the current
    /// clock. Fire-and-forget; sent by the periodic re-evaluator so the
    /// fast-idle and pending-tool timeouts take effect without file
    /// activity.
    RecheckTimeouts,

    /// Get a single session snapshot.
    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionSnapshot>>,
    },

    /// Get all session snapshots.
    GetAllSessions {
        respond_to: oneshot::Sender<Vec<SessionSnapshot>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The registry has reached its maximum session capacity.
    #[error("registry is full (max: {max} sessions)")]
    RegistryFull { max: usize },

    /// The requested session was not found.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The response channel was closed before receiving a response.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Session Events
// ============================================================================

/// Why a session was deleted from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionReason {
    /// The backing log file was unlinked.
    FileRemoved,

    /// A newer session appeared in the same working directory on the
    /// same host while this one was idle.
    Superseded,
}

impl std::fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileRemoved => write!(f, "log file removed"),
            Self::Superseded => write!(f, "superseded by a newer session in the same cwd"),
        }
    }
}

/// Events published by the registry to subscribers.
///
/// For a given session, `Created` precedes every `Updated`, and
/// `Updated` events precede `Deleted`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session became publicly visible.
    Created { snapshot: Box<SessionSnapshot> },

    /// A session's status changed or its message count grew.
    Updated {
        snapshot: Box<SessionSnapshot>,
        /// Present only when this update's transition was
        /// working -> waiting.
        notification: Option<StatusNotification>,
    },

    /// A session left the registry.
    Deleted {
        session_id: SessionId,
        reason: DeletionReason,
    },
}

impl SessionEvent {
    /// Returns the session id this event is about.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Created { snapshot } => &snapshot.session_id,
            Self::Updated { snapshot, .. } => &snapshot.session_id,
            Self::Deleted { session_id, .. } => session_id,
        }
    }
}
