//! CCUI Core - Shared domain types for the claude-code-ui daemon
//!
//! This crate provides the pure domain layer shared between the daemon
//! and its wire protocol: session identities, parsed log entries, and
//! the status derivation function. No I/O, no async.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`
//! in production paths.

pub mod entry;
pub mod error;
pub mod session;
pub mod status;

// Re-exports for convenience
pub use entry::{EntryKind, RawEntry, ToolUse};
pub use error::{DomainError, DomainResult};
pub use session::{LauncherId, PtyId, PullRequestRef, Session, SessionId, SessionSnapshot};
pub use status::{
    derive_status, DerivedStatus, DisplayColumn, SessionStatus, DEFAULT_IDLE_TIMEOUT, FAST_IDLE,
    PENDING_TOOL_WAIT,
};
