//! Status derivation.
//!
//! [`derive_status`] is a pure function from the ordered entry list plus a
//! caller-supplied clock to a status tuple. It holds no state between
//! calls, so the registry can re-evaluate it on a timer without any file
//! activity and tests can exercise every timing rule with a fixed clock.

use crate::entry::{EntryKind, RawEntry, ToolUse};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Idle-after-text threshold: an assistant text entry older than this
/// with nothing after it means the turn has ended, even when the agent
/// never wrote a turn marker.
pub const FAST_IDLE: Duration = Duration::from_millis(500);

/// An unanswered tool use older than this is waiting for approval.
pub const PENDING_TOOL_WAIT: Duration = Duration::from_secs(5);

/// Default inactivity window before a session is considered idle.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Current operational status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The agent is actively processing.
    Working,

    /// The agent finished (or is blocked) and the user must act.
    Waiting,

    /// Nothing has happened for the idle window.
    #[default]
    Idle,
}

impl SessionStatus {
    /// Returns the wire/display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Waiting => "waiting",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The four columns the dashboard distinguishes.
///
/// `Waiting` splits on whether a tool use is pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayColumn {
    Working,
    NeedsApproval,
    WaitingForInput,
    Idle,
}

/// Output of [`derive_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedStatus {
    pub status: SessionStatus,
    pub has_pending_tool_use: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_tool: Option<ToolUse>,
    pub message_count: usize,
    pub last_activity_at: DateTime<Utc>,
}

impl DerivedStatus {
    /// Maps the tuple onto the dashboard's four columns.
    #[must_use]
    pub fn display_column(&self) -> DisplayColumn {
        match (self.status, self.has_pending_tool_use) {
            (SessionStatus::Working, _) => DisplayColumn::Working,
            (SessionStatus::Waiting, true) => DisplayColumn::NeedsApproval,
            (SessionStatus::Waiting, false) => DisplayColumn::WaitingForInput,
            (SessionStatus::Idle, _) => DisplayColumn::Idle,
        }
    }
}

/// Derives the status tuple from the ordered entry list and a clock.
///
/// Deterministic: the result depends only on `entries`, `now`, and
/// `idle_timeout`. An empty entry list yields `working` with
/// `last_activity_at = now` (a session whose first entry has not been
/// parsed yet is, by construction, brand new).
///
/// Decision ladder (first match wins):
/// 1. pending tool use and unanswered for >= 5 s -> waiting (approval)
/// 2. no activity for >= idle_timeout -> idle
/// 3. last entry is a turn marker -> waiting
/// 4. last entry is assistant text and >= 500 ms old -> waiting
/// 5. otherwise -> working
#[must_use]
pub fn derive_status(
    entries: &[RawEntry],
    now: DateTime<Utc>,
    idle_timeout: Duration,
) -> DerivedStatus {
    let message_count = entries.iter().filter(|e| e.is_message()).count();

    let Some(last) = entries.last() else {
        return DerivedStatus {
            status: SessionStatus::Working,
            has_pending_tool_use: false,
            pending_tool: None,
            message_count,
            last_activity_at: now,
        };
    };

    let last_activity_at = entries
        .iter()
        .map(|e| e.timestamp)
        .max()
        .unwrap_or(last.timestamp);

    let pending_tool = find_pending_tool(entries);
    let since_activity = now.signed_duration_since(last_activity_at);

    let status = if pending_tool.is_some() && since_activity >= to_chrono(PENDING_TOOL_WAIT) {
        SessionStatus::Waiting
    } else if since_activity >= to_chrono(idle_timeout) {
        SessionStatus::Idle
    } else if matches!(last.kind, EntryKind::TurnEnd) {
        SessionStatus::Waiting
    } else if matches!(last.kind, EntryKind::AssistantText)
        && since_activity >= to_chrono(FAST_IDLE)
    {
        SessionStatus::Waiting
    } else {
        SessionStatus::Working
    };

    let has_pending_tool_use =
        pending_tool.is_some() && status == SessionStatus::Waiting;

    DerivedStatus {
        status,
        has_pending_tool_use,
        pending_tool: if has_pending_tool_use {
            pending_tool
        } else {
            None
        },
        message_count,
        last_activity_at,
    }
}

/// Finds the most recent tool use with no tool result or turn marker
/// after it. Scans in reverse; the first decisive entry wins.
fn find_pending_tool(entries: &[RawEntry]) -> Option<ToolUse> {
    for entry in entries.iter().rev() {
        match &entry.kind {
            EntryKind::AssistantToolUse(tool) => return Some(tool.clone()),
            EntryKind::ToolResult | EntryKind::TurnEnd => return None,
            _ => {}
        }
    }
    None
}

fn to_chrono(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::MAX)
}
