//! Session registry using the actor pattern.
//!
//! The registry is the central state manager for all observed agent
//! sessions. It receives commands via a tokio mpsc channel and is the
//! canonical source of truth for session data.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ TranscriptTailer│────▶│  RegistryActor  │────▶│ Broadcast Channel │
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                        │
//!         │   RegistryCommand     │   SessionEvent         │
//!         │   (mpsc channel)      │   (broadcast)          ▼
//!         ▼                       ▼                 State Publisher,
//!    ApplyBatch /           HashMap<SessionId,      stream subscribers
//!    FileRemoved            Session>
//! ```
//!
//! A 2-second re-evaluation ticker drives the timeout-only status
//! transitions (fast-idle, pending-tool) for sessions with no file
//! activity.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::debug;

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, MAX_SESSIONS};
pub use commands::{DeletionReason, FileBatch, RegistryCommand, RegistryError, SessionEvent};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Re-evaluation interval in seconds
const RECHECK_INTERVAL_SECS: u64 = 2;

/// Injected clock. Production uses [`system_clock`]; tests substitute a
/// fixed one so every timing rule is exercised deterministically.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The system clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Spawns the registry actor and returns a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Spawns the periodic re-evaluation ticker
/// 4. Returns a RegistryHandle for client use
pub fn spawn_registry(idle_timeout: Duration) -> RegistryHandle {
    spawn_registry_with_clock(idle_timeout, system_clock())
}

/// Spawns the registry with an injected clock (for tests).
pub fn spawn_registry_with_clock(idle_timeout: Duration, clock: Clock) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), idle_timeout, clock);
    tokio::spawn(actor.run());

    let handle = RegistryHandle::new(cmd_tx.clone(), event_tx);

    spawn_recheck_ticker(cmd_tx);

    handle
}

/// Spawns the periodic re-evaluation ticker.
///
/// Stops when the command channel closes (actor stopped).
fn spawn_recheck_ticker(sender: mpsc::Sender<RegistryCommand>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(RECHECK_INTERVAL_SECS));

        loop {
            ticker.tick().await;

            if sender.send(RegistryCommand::RecheckTimeouts).await.is_err() {
                debug!("Recheck ticker stopping: registry channel closed");
                break;
            }
        }
    });
}
