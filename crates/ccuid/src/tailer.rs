//! Incremental tailing of agent conversation logs.
//!
//! Watches the configured roots for `*.jsonl` files (to depth 2,
//! skipping `agent-*` sub-session logs), and on change reads only the
//! delta past the last consumed line terminator. Rapid change events
//! coalesce through a per-file debounce; a periodic sweep compares file
//! sizes against recorded offsets to absorb dropped filesystem events on
//! network mounts.
//!
//! Offset discipline: the offset advances only past complete lines. A
//! partial trailing line stays unread until its terminator arrives. A
//! malformed line is skipped with an error log, but the offset still
//! advances past it so the tailer never stalls. A file that shrank was
//! truncated or replaced: the offset resets to zero and the batch tells
//! the registry to discard prior entries.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ccui_core::RawEntry;
use ccui_protocol::transcript::{RawTranscriptLine, SessionMeta};

use crate::registry::{FileBatch, RegistryHandle};

/// Per-file debounce window. A second change event restarts the timer;
/// one handler fires per quiescent interval.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Catch-up sweep interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// Log file suffix.
const LOG_SUFFIX: &str = "jsonl";

/// Sub-session log prefix; these files never form sessions.
const SUB_SESSION_PREFIX: &str = "agent-";

/// Maximum depth of a log file below its watch root.
const MAX_DEPTH: usize = 2;

/// One watched filesystem root and the host label of its sessions.
#[derive(Debug, Clone)]
pub struct WatchRoot {
    pub root: PathBuf,
    pub hostname: String,
}

/// Errors from tailer file operations.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Spawns the tailer over the given roots.
///
/// Existing files are seeded once at startup so pre-existing sessions
/// appear without waiting for a write. The task runs until cancelled.
pub fn spawn_tailer(
    roots: Vec<WatchRoot>,
    registry: RegistryHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut runtime = TailerRuntime::new(roots, registry, cancel);
        runtime.run().await;
    })
}

enum TailMessage {
    Changed(PathBuf),
    Removed(PathBuf),
    Process(PathBuf),
    Sweep,
}

struct FileState {
    offset: u64,
    hostname: String,
    /// Cumulative metadata for the session; first writer wins per field.
    meta: SessionMeta,
}

struct TailerRuntime {
    roots: Vec<WatchRoot>,
    registry: RegistryHandle,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<TailMessage>,
    rx: mpsc::UnboundedReceiver<TailMessage>,
    files: HashMap<PathBuf, FileState>,
    debounce_tasks: HashMap<PathBuf, JoinHandle<()>>,
    // Watchers are dropped (and stop) with the runtime
    watchers: Vec<RecommendedWatcher>,
}

impl TailerRuntime {
    fn new(roots: Vec<WatchRoot>, registry: RegistryHandle, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            roots,
            registry,
            cancel,
            tx,
            rx,
            files: HashMap::new(),
            debounce_tasks: HashMap::new(),
            watchers: Vec::new(),
        }
    }

    async fn run(&mut self) {
        self.install_watchers();
        self.seed_existing().await;
        self.spawn_sweep_task();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Tailer shutting down");
                    break;
                }

                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        TailMessage::Changed(path) => self.schedule(path),
                        TailMessage::Removed(path) => self.handle_removed(path).await,
                        TailMessage::Process(path) => self.process_file(&path).await,
                        TailMessage::Sweep => self.sweep().await,
                    }
                }
            }
        }

        for task in self.debounce_tasks.values() {
            task.abort();
        }
    }

    fn install_watchers(&mut self) {
        for watch_root in &self.roots {
            let tx = self.tx.clone();
            let mut watcher = match RecommendedWatcher::new(
                move |res: Result<Event, notify::Error>| match res {
                    Ok(event) => {
                        let removed = match event.kind {
                            EventKind::Create(_) | EventKind::Modify(_) => false,
                            EventKind::Remove(_) => true,
                            _ => return,
                        };
                        for path in event.paths {
                            let msg = if removed {
                                TailMessage::Removed(path)
                            } else {
                                TailMessage::Changed(path)
                            };
                            let _ = tx.send(msg);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Watcher event error");
                    }
                },
                notify::Config::default(),
            ) {
                Ok(w) => w,
                Err(err) => {
                    warn!(
                        root = %watch_root.root.display(),
                        error = %err,
                        "Failed to create watcher"
                    );
                    continue;
                }
            };

            if let Err(err) = watcher.watch(&watch_root.root, RecursiveMode::Recursive) {
                warn!(
                    root = %watch_root.root.display(),
                    error = %err,
                    "Failed to watch root"
                );
                continue;
            }

            info!(
                root = %watch_root.root.display(),
                hostname = %watch_root.hostname,
                "Watching log root"
            );
            self.watchers.push(watcher);
        }
    }

    /// Processes every existing log file once at startup.
    async fn seed_existing(&mut self) {
        let mut seeded = 0usize;
        for watch_root in self.roots.clone() {
            for path in collect_log_files(&watch_root.root, MAX_DEPTH) {
                self.process_file(&path).await;
                seeded += 1;
            }
        }
        if seeded > 0 {
            info!(files = seeded, "Startup seed complete");
        }
    }

    fn spawn_sweep_task(&self) {
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                        if tx.send(TailMessage::Sweep).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Restarts the per-file debounce timer.
    fn schedule(&mut self, path: PathBuf) {
        if self.classify_path(&path).is_none() {
            return;
        }

        if let Some(handle) = self.debounce_tasks.remove(&path) {
            handle.abort();
        }

        let tx = self.tx.clone();
        let scheduled = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            let _ = tx.send(TailMessage::Process(scheduled));
        });

        self.debounce_tasks.insert(path, handle);
    }

    /// Resolves a path to (session id stem, hostname) if it is a
    /// watchable log file under one of the roots.
    fn classify_path(&self, path: &Path) -> Option<(String, String)> {
        if path.extension().and_then(|e| e.to_str()) != Some(LOG_SUFFIX) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.starts_with(SUB_SESSION_PREFIX) {
            return None;
        }

        for watch_root in &self.roots {
            if let Ok(relative) = path.strip_prefix(&watch_root.root) {
                if relative.components().count() <= MAX_DEPTH {
                    return Some((stem.to_string(), watch_root.hostname.clone()));
                }
            }
        }
        None
    }

    /// Reads the file delta and forwards the batch to the registry.
    async fn process_file(&mut self, path: &Path) {
        let Some((stem, hostname)) = self.classify_path(path) else {
            return;
        };
        self.debounce_tasks.remove(path);

        let offset = self.files.get(path).map(|s| s.offset).unwrap_or(0);

        let delta = {
            let owned = path.to_path_buf();
            tokio::task::spawn_blocking(move || read_delta(&owned, offset)).await
        };

        let delta = match delta {
            Ok(Ok(delta)) => delta,
            Ok(Err(err)) => {
                // Unreadable file: error event, null batch, never fatal.
                warn!(path = %path.display(), error = %err, "Failed to read log file");
                return;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Tail task panicked");
                return;
            }
        };

        let state = self
            .files
            .entry(path.to_path_buf())
            .or_insert_with(|| FileState {
                offset: 0,
                hostname: hostname.clone(),
                meta: SessionMeta {
                    session_id: stem.clone(),
                    ..SessionMeta::default()
                },
            });

        if delta.reset {
            state.meta = SessionMeta {
                session_id: stem.clone(),
                ..SessionMeta::default()
            };
        }
        if let Some(meta) = &delta.meta {
            state.meta.merge(meta);
        }
        state.offset = delta.new_offset;

        if delta.entries.is_empty() && !delta.reset {
            return;
        }

        debug!(
            path = %path.display(),
            entries = delta.entries.len(),
            offset = delta.new_offset,
            skipped = delta.skipped_lines,
            "Processed log delta"
        );

        let batch = FileBatch {
            session_id: stem.into(),
            hostname,
            meta: Some(state.meta.clone()),
            entries: delta.entries,
            byte_position: delta.new_offset,
            reset: delta.reset,
        };

        if let Err(err) = self.registry.apply_batch(batch).await {
            warn!(path = %path.display(), error = %err, "Registry rejected batch");
        }
    }

    async fn handle_removed(&mut self, path: PathBuf) {
        let Some((stem, _)) = self.classify_path(&path) else {
            return;
        };
        if let Some(handle) = self.debounce_tasks.remove(&path) {
            handle.abort();
        }
        self.files.remove(&path);
        debug!(path = %path.display(), "Log file removed");
        self.registry.file_removed(stem.into()).await;
    }

    /// Backstop for dropped filesystem events: reprocess any known file
    /// whose size no longer matches its recorded offset.
    async fn sweep(&mut self) {
        let stale: Vec<PathBuf> = self
            .files
            .iter()
            .filter_map(|(path, state)| {
                let len = std::fs::metadata(path).map(|m| m.len()).ok()?;
                if len != state.offset {
                    Some(path.clone())
                } else {
                    None
                }
            })
            .collect();

        for path in stale {
            self.process_file(&path).await;
        }
    }
}

/// Result of one incremental read.
#[derive(Debug)]
pub struct Delta {
    pub entries: Vec<RawEntry>,
    pub meta: Option<SessionMeta>,
    pub new_offset: u64,
    pub reset: bool,
    pub skipped_lines: usize,
}

/// Reads a file from `offset` to EOF and parses all complete lines.
///
/// The returned offset points just past the last consumed line
/// terminator; a partial trailing line is left for the next read. A
/// file shorter than `offset` resets to zero and re-reads from the
/// start.
pub fn read_delta(path: &Path, offset: u64) -> Result<Delta, TailError> {
    let io_err = |source| TailError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let len = file.metadata().map_err(io_err)?.len();

    let (start, reset) = if len < offset { (0, true) } else { (offset, false) };

    file.seek(SeekFrom::Start(start)).map_err(io_err)?;
    let mut chunk = Vec::new();
    file.read_to_end(&mut chunk).map_err(io_err)?;

    // Consume only up to the last line terminator.
    let Some(last_newline) = chunk.iter().rposition(|&b| b == b'\n') else {
        return Ok(Delta {
            entries: Vec::new(),
            meta: None,
            new_offset: start,
            reset,
            skipped_lines: 0,
        });
    };
    let complete = &chunk[..=last_newline];
    let new_offset = start + complete.len() as u64;

    let text = String::from_utf8_lossy(complete);
    let now = chrono::Utc::now();

    let mut entries = Vec::new();
    let mut meta: Option<SessionMeta> = None;
    let mut skipped_lines = 0usize;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match RawTranscriptLine::decode(trimmed) {
            Ok(record) => {
                // Sidechain records belong to sub-agents; their metadata
                // must not leak into the parent session.
                if !record.is_sidechain {
                    if let Some(record_meta) = record.meta() {
                        match meta.as_mut() {
                            Some(existing) => existing.merge(&record_meta),
                            None => meta = Some(record_meta),
                        }
                    }
                }
                entries.push(record.classify(now));
            }
            Err(err) => {
                // Skip the malformed line; the offset has already
                // advanced past it, so the tailer cannot stall here.
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Skipping malformed log line"
                );
                skipped_lines += 1;
            }
        }
    }

    Ok(Delta {
        entries,
        meta,
        new_offset,
        reset,
        skipped_lines,
    })
}

/// Collects log files under `root` up to `max_depth` path components,
/// skipping sub-session logs.
fn collect_log_files(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    let mut found = Vec::new();
    collect_into(root, root, max_depth, &mut found);
    found
}

fn collect_into(root: &Path, dir: &Path, max_depth: usize, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let depth = path
            .strip_prefix(root)
            .map(|rel| rel.components().count())
            .unwrap_or(usize::MAX);

        if path.is_dir() {
            if depth < max_depth {
                collect_into(root, &path, max_depth, found);
            }
            continue;
        }

        if depth > max_depth {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(LOG_SUFFIX) {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if stem.starts_with(SUB_SESSION_PREFIX) {
            continue;
        }
        found.push(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccui_core::EntryKind;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn user_line(text: &str, ts: &str) -> String {
        format!(
            r#"{{"type":"user","sessionId":"abc","cwd":"/w","timestamp":"{ts}","message":{{"role":"user","content":"{text}"}}}}"#
        )
    }

    #[test]
    fn test_read_delta_from_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.jsonl");
        let line = user_line("build X", "2024-05-01T10:00:00Z");
        fs::write(&path, format!("{line}\n")).unwrap();

        let delta = read_delta(&path, 0).unwrap();
        assert_eq!(delta.entries.len(), 1);
        assert_eq!(delta.new_offset, line.len() as u64 + 1);
        assert!(!delta.reset);
        assert!(delta.meta.as_ref().unwrap().is_complete());
    }

    #[test]
    fn test_read_delta_is_incremental() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.jsonl");
        let first = user_line("one", "2024-05-01T10:00:00Z");
        fs::write(&path, format!("{first}\n")).unwrap();

        let delta = read_delta(&path, 0).unwrap();
        let offset = delta.new_offset;

        let second = user_line("two", "2024-05-01T10:00:05Z");
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{second}").unwrap();

        let delta = read_delta(&path, offset).unwrap();
        assert_eq!(delta.entries.len(), 1);
        match &delta.entries[0].kind {
            EntryKind::UserPrompt { text } => assert_eq!(text, "two"),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_partial_trailing_line_is_not_consumed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.jsonl");
        let complete = user_line("one", "2024-05-01T10:00:00Z");
        fs::write(&path, format!("{complete}\n{{\"type\":\"user\"")).unwrap();

        let delta = read_delta(&path, 0).unwrap();
        assert_eq!(delta.entries.len(), 1);
        assert_eq!(delta.new_offset, complete.len() as u64 + 1);

        // Completing the line later yields exactly one more entry
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(
            file,
            ",\"message\":{{\"role\":\"user\",\"content\":\"two\"}}}}\n"
        )
        .unwrap();

        let delta = read_delta(&path, delta.new_offset).unwrap();
        assert_eq!(delta.entries.len(), 1);
    }

    #[test]
    fn test_malformed_line_is_skipped_but_offset_advances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.jsonl");
        let good = user_line("one", "2024-05-01T10:00:00Z");
        fs::write(&path, format!("not json at all\n{good}\n")).unwrap();

        let delta = read_delta(&path, 0).unwrap();
        assert_eq!(delta.skipped_lines, 1);
        assert_eq!(delta.entries.len(), 1);
        // Offset is past both lines: the malformed line never re-reads
        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(delta.new_offset, len);
    }

    #[test]
    fn test_truncation_resets_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.jsonl");
        let long = user_line("a much longer first prompt", "2024-05-01T10:00:00Z");
        fs::write(&path, format!("{long}\n")).unwrap();
        let delta = read_delta(&path, 0).unwrap();
        let offset = delta.new_offset;

        // Replace with a shorter file
        let short = user_line("s", "2024-05-01T11:00:00Z");
        fs::write(&path, format!("{short}\n")).unwrap();

        let delta = read_delta(&path, offset).unwrap();
        assert!(delta.reset);
        assert_eq!(delta.entries.len(), 1);
        assert_eq!(delta.new_offset, short.len() as u64 + 1);
    }

    #[test]
    fn test_unreadable_file_is_error_not_panic() {
        let result = read_delta(Path::new("/nonexistent/abc.jsonl"), 0);
        assert!(matches!(result, Err(TailError::Io { .. })));
    }

    #[test]
    fn test_collect_log_files_depth_and_prefix() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("-home-u-w");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("abc.jsonl"), "{}\n").unwrap();
        fs::write(project.join("agent-sub.jsonl"), "{}\n").unwrap();
        fs::write(project.join("notes.txt"), "x").unwrap();

        let deep = project.join("nested");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("deep.jsonl"), "{}\n").unwrap();

        let files = collect_log_files(dir.path(), MAX_DEPTH);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("-home-u-w/abc.jsonl"));
    }

    #[test]
    fn test_sidechain_meta_does_not_leak() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.jsonl");
        let sidechain = r#"{"type":"user","isSidechain":true,"sessionId":"abc","cwd":"/sub","timestamp":"2024-05-01T09:00:00Z","message":{"role":"user","content":"sub"}}"#;
        let main = user_line("main", "2024-05-01T10:00:00Z");
        fs::write(&path, format!("{sidechain}\n{main}\n")).unwrap();

        let delta = read_delta(&path, 0).unwrap();
        assert_eq!(delta.entries.len(), 2);
        assert_eq!(delta.meta.unwrap().cwd.as_deref(), Some("/w"));
    }
}
