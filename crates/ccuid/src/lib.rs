//! CCUI Daemon - Session derivation core and terminal multiplexer bridge
//!
//! This crate provides the daemon infrastructure:
//! - `tailer` - incremental tailing of agent conversation logs
//! - `registry` - session registry actor (single owner of session state)
//! - `publisher` - persistent, resumable session change stream
//! - `terminal` - PTY attachments to detached multiplexer sessions
//! - `server` - HTTP facade, terminal WebSocket, stream endpoint
//! - `machines` - remote log roots over SSHFS
//! - `hostterm` - host terminal-emulator capability (focus/open)
//!
//! # Architecture
//!
//! ```text
//! fs events ──▶ TranscriptTailer ──▶ RegistryActor ──▶ Publisher ──▶ GET /sessions
//!                                        │  events
//!                                        ▼
//!                              broadcast::Sender<SessionEvent>
//!
//! browser ──▶ /terminal (WS) ──▶ TerminalManager ◀──▶ multiplexer PTY
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod hostterm;
pub mod machines;
pub mod procscan;
pub mod publisher;
pub mod registry;
pub mod server;
pub mod tailer;
pub mod terminal;
pub mod tmux;
