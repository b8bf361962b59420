//! Session domain entities and value objects.

use crate::entry::RawEntry;
use crate::status::{derive_status, DerivedStatus, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for an agent session.
///
/// Wraps the UUID stem of the session's log file
/// (e.g., "8e11bfb5-7dc2-432b-9206-928fa5c35731" for
/// `8e11bfb5-7dc2-432b-9206-928fa5c35731.jsonl`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new SessionId from a string.
    ///
    /// Note: this does not validate UUID format. The agent CLI names the
    /// log file, so we trust its format.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form (first 8 characters).
    ///
    /// Used for multiplexer session names (`claude-<short>`).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier for a launcher flow (directory picker producing a fresh
/// agent session). Synthesized by the daemon, never by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LauncherId(String);

impl LauncherId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form (first 8 characters) for the
    /// `launcher-<short>` multiplexer session name.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for LauncherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for LauncherId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier for a managed PTY attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PtyId(String);

impl PtyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PtyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PtyId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Pull Request Reference
// ============================================================================

/// Pull request associated with a session's branch.
///
/// Filled in by the external PR poller; the derivation core only
/// carries it through to the published snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestRef {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub url: String,
}

// ============================================================================
// Domain Entity
// ============================================================================

/// Core domain model for one observed agent session.
///
/// Owned exclusively by the registry actor. The entry list is always a
/// prefix of the underlying log file - no reordering, no gaps - and
/// `byte_position` is monotonically non-decreasing except across a
/// truncation reset.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session identifier (log file stem)
    pub id: SessionId,

    /// Host label of the filesystem root the log was observed under
    pub hostname: String,

    /// Working directory the agent ran in
    pub cwd: String,

    /// Git branch captured from log metadata, if present
    pub git_branch: Option<String>,

    /// Stable repository identifier (origin URL or top-level path)
    pub git_repo_id: Option<String>,

    /// First user prompt of the session
    pub original_prompt: Option<String>,

    /// Last meaningful (non-whitespace) user prompt
    pub goal: Option<String>,

    /// AI-generated summary, filled in by the external summarizer
    pub summary: Option<String>,

    /// Pull request for the session's branch, if the poller found one
    pub pr: Option<PullRequestRef>,

    /// When the session started (first log timestamp)
    pub started_at: DateTime<Utc>,

    /// Timestamp of the most recent entry
    pub last_activity_at: DateTime<Utc>,

    /// Derived status
    pub status: SessionStatus,

    /// True when a tool use is waiting for approval
    pub has_pending_tool_use: bool,

    /// The unanswered tool use, when pending
    pub pending_tool: Option<crate::entry::ToolUse>,

    /// Count of user + assistant entries
    pub message_count: usize,

    /// Ordered parsed entries (a prefix of the log file)
    pub entries: Vec<RawEntry>,

    /// Byte offset of the last consumed line terminator in the log file
    pub byte_position: u64,
}

impl Session {
    /// Creates a session from its first observed metadata.
    pub fn new(
        id: SessionId,
        hostname: impl Into<String>,
        cwd: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            cwd: cwd.into(),
            git_branch: None,
            git_repo_id: None,
            original_prompt: None,
            goal: None,
            summary: None,
            pr: None,
            started_at,
            last_activity_at: started_at,
            status: SessionStatus::Working,
            has_pending_tool_use: false,
            pending_tool: None,
            message_count: 0,
            entries: Vec::new(),
            byte_position: 0,
        }
    }

    /// Appends a batch of entries and advances the byte position.
    ///
    /// The byte position never moves backwards; a truncation reset must
    /// go through [`Session::reset_entries`] first.
    pub fn append_entries(&mut self, entries: Vec<RawEntry>, byte_position: u64) {
        for entry in &entries {
            if let Some(prompt) = entry.meaningful_prompt() {
                if self.original_prompt.is_none() {
                    self.original_prompt = Some(prompt.to_string());
                }
                self.goal = Some(prompt.to_string());
            }
        }
        self.entries.extend(entries);
        if byte_position > self.byte_position {
            self.byte_position = byte_position;
        }
    }

    /// Discards all entries after a file truncation or replacement.
    pub fn reset_entries(&mut self) {
        self.entries.clear();
        self.byte_position = 0;
        self.original_prompt = None;
        self.goal = None;
    }

    /// Re-derives the status tuple and applies it.
    ///
    /// Returns the previous status so the caller can detect transitions.
    pub fn refresh_status(&mut self, now: DateTime<Utc>, idle_timeout: Duration) -> SessionStatus {
        let previous = self.status;
        let derived: DerivedStatus = derive_status(&self.entries, now, idle_timeout);
        self.status = derived.status;
        self.has_pending_tool_use = derived.has_pending_tool_use;
        self.pending_tool = derived.pending_tool;
        self.message_count = derived.message_count;
        self.last_activity_at = derived.last_activity_at;
        previous
    }

    /// Builds the wire snapshot of this session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            hostname: self.hostname.clone(),
            cwd: self.cwd.clone(),
            git_branch: self.git_branch.clone(),
            git_repo_id: self.git_repo_id.clone(),
            original_prompt: self.original_prompt.clone(),
            goal: self.goal.clone(),
            summary: self.summary.clone(),
            pr: self.pr.clone(),
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            status: self.status,
            has_pending_tool_use: self.has_pending_tool_use,
            pending_tool: self.pending_tool.clone(),
            message_count: self.message_count,
        }
    }
}

// ============================================================================
// Wire View
// ============================================================================

/// Read-only snapshot of a session for publication.
///
/// This is the full post-image carried on insert/update change records.
/// Entries and byte positions stay private to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub hostname: String,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_repo_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr: Option<PullRequestRef>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub has_pending_tool_use: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_tool: Option<crate::entry::ToolUse>,
    pub message_count: usize,
}
