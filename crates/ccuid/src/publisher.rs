//! State publisher - persistent, resumable session change stream.
//!
//! Registry events funnel through a single append path into an on-disk
//! log of JSON change records plus an index, which makes the append
//! linearizable: sequence numbers are monotonic and gap-free, and a
//! replay from any sequence number composes with the live tail into an
//! at-least-once stream that clients materialize idempotently by
//! session id.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ccui_protocol::ChangeRecord;

use crate::registry::{RegistryHandle, SessionEvent};

/// Live-tail buffer per stream. A subscriber that falls further behind
/// than this is disconnected and must re-subscribe.
const LIVE_BUFFER: usize = 1024;

/// File name of the record log inside the stream directory.
const RECORDS_FILE: &str = "records.jsonl";

/// File name of the index inside the stream directory.
const INDEX_FILE: &str = "index.json";

/// Errors from publisher operations.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("stream directory {path} is not writable: {source}")]
    StateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to append change record: {0}")]
    Append(std::io::Error),

    #[error("failed to read change log: {0}")]
    Read(std::io::Error),
}

// ============================================================================
// On-Disk Store
// ============================================================================

/// Index persisted next to the record log.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StreamIndex {
    head: u64,
}

/// Append-only change log on disk.
///
/// Records are newline-delimited JSON; the index tracks `head`, the
/// highest sequence number appended. Unparseable records found during
/// replay are skipped (the client's idempotent materialization absorbs
/// the gap on its side; the live head is authoritative).
pub struct StreamStore {
    dir: PathBuf,
    head: u64,
    writer: File,
}

impl StreamStore {
    /// Opens (or creates) the store under `dir`.
    ///
    /// With `clear`, any existing records are removed first. An
    /// unwritable directory is a fatal startup error.
    pub fn open(dir: PathBuf, clear: bool) -> Result<Self, PublishError> {
        if clear && dir.exists() {
            info!(dir = %dir.display(), "Clearing persisted stream");
            fs::remove_dir_all(&dir).map_err(|source| PublishError::StateDir {
                path: dir.clone(),
                source,
            })?;
        }

        fs::create_dir_all(&dir).map_err(|source| PublishError::StateDir {
            path: dir.clone(),
            source,
        })?;

        let head = Self::load_head(&dir);

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(RECORDS_FILE))
            .map_err(|source| PublishError::StateDir {
                path: dir.clone(),
                source,
            })?;

        Ok(Self { dir, head, writer })
    }

    fn load_head(dir: &std::path::Path) -> u64 {
        let index_path = dir.join(INDEX_FILE);
        let Ok(raw) = fs::read_to_string(&index_path) else {
            return 0;
        };
        match serde_json::from_str::<StreamIndex>(&raw) {
            Ok(index) => index.head,
            Err(err) => {
                warn!(error = %err, "Corrupt stream index, restarting at head 0");
                0
            }
        }
    }

    /// Highest sequence number appended so far (0 = empty).
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Appends one record and persists the new head.
    fn append(&mut self, record: &ChangeRecord) -> Result<(), PublishError> {
        let json = serde_json::to_string(record).map_err(|err| {
            PublishError::Append(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        self.writer
            .write_all(json.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush())
            .map_err(PublishError::Append)?;

        self.head = record.seq;
        let index = StreamIndex { head: self.head };
        if let Ok(serialized) = serde_json::to_string(&index) {
            if let Err(err) = fs::write(self.dir.join(INDEX_FILE), serialized) {
                warn!(error = %err, "Failed to persist stream index");
            }
        }
        Ok(())
    }

    /// Reads all records with `seq > from`, in order.
    fn read_after(&self, from: u64) -> Result<Vec<ChangeRecord>, PublishError> {
        let path = self.dir.join(RECORDS_FILE);
        let file = File::open(&path).map_err(PublishError::Read)?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(PublishError::Read)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChangeRecord>(&line) {
                Ok(record) if record.seq > from => records.push(record),
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable change record");
                }
            }
        }
        Ok(records)
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// A subscription: the replayed prefix plus a live tail receiver.
pub struct Subscription {
    pub replay: Vec<ChangeRecord>,
    pub live: broadcast::Receiver<ChangeRecord>,
}

/// The state publisher.
///
/// One instance per stream. All appends go through [`Publisher::publish`]
/// under the store lock, establishing the total order across registry
/// events.
pub struct Publisher {
    store: Mutex<StreamStore>,
    live_tx: broadcast::Sender<ChangeRecord>,
    max_age: ChronoDuration,
}

impl Publisher {
    /// Creates a publisher over an opened store.
    pub fn new(store: StreamStore, max_age: std::time::Duration) -> Arc<Self> {
        let (live_tx, _) = broadcast::channel(LIVE_BUFFER);
        Arc::new(Self {
            store: Mutex::new(store),
            live_tx,
            max_age: ChronoDuration::from_std(max_age)
                .unwrap_or_else(|_| ChronoDuration::hours(24)),
        })
    }

    /// Spawns the task that drains registry events into the stream.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        registry: &RegistryHandle,
        cancel: CancellationToken,
    ) {
        let publisher = Arc::clone(self);
        let mut events = registry.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Publisher event pump shutting down");
                        break;
                    }

                    result = events.recv() => {
                        match result {
                            Ok(event) => publisher.publish(event).await,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Publisher lagged behind registry events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Registry event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Converts one registry event into a change record and appends it.
    ///
    /// Sessions inactive longer than the publish window are filtered
    /// from insert/update; deletes always pass so stale subscribers
    /// converge.
    pub async fn publish(&self, event: SessionEvent) {
        let now = Utc::now();

        let mut store = self.store.lock().await;
        let seq = store.head() + 1;

        let record = match event {
            SessionEvent::Created { snapshot } => {
                if now.signed_duration_since(snapshot.last_activity_at) > self.max_age {
                    debug!(session_id = %snapshot.session_id, "Session outside publish window");
                    return;
                }
                ChangeRecord::insert(seq, *snapshot)
            }
            SessionEvent::Updated {
                snapshot,
                notification,
            } => {
                if now.signed_duration_since(snapshot.last_activity_at) > self.max_age {
                    return;
                }
                ChangeRecord::update(seq, *snapshot, notification)
            }
            SessionEvent::Deleted { session_id, .. } => ChangeRecord::delete(seq, session_id),
        };

        if let Err(err) = store.append(&record) {
            error!(error = %err, seq, "Failed to append change record");
            return;
        }
        // Send under the store lock so live order matches log order.
        let _ = self.live_tx.send(record);
    }

    /// Subscribes with replay of everything after `from`.
    ///
    /// The replay and the live receiver are taken under the same lock,
    /// so together they form a gap-free continuation.
    pub async fn subscribe_from(&self, from: u64) -> Result<Subscription, PublishError> {
        let store = self.store.lock().await;
        let replay = store.read_after(from)?;
        let live = self.live_tx.subscribe();
        Ok(Subscription { replay, live })
    }

    /// Current head sequence number.
    pub async fn head(&self) -> u64 {
        self.store.lock().await.head()
    }
}
