//! Parsed log entries.
//!
//! Each line of an agent conversation log decodes into exactly one
//! [`RawEntry`]. Classification is strictly structural - the daemon never
//! inspects conversational content beyond the shapes defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tool invocation requested by the agent.
///
/// `target` is the first path-like or command-like field of the tool
/// input, normalized for display (single line, bounded length).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUse {
    /// Tool name (e.g., "Bash", "Edit", "Write")
    pub name: String,

    /// Normalized target (file path or command), if the input carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl ToolUse {
    pub fn new(name: impl Into<String>, target: Option<String>) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }
}

impl fmt::Display for ToolUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}({})", self.name, target),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Structural shape of one log line.
///
/// Unknown or irrelevant record shapes become `Other` - never a parse
/// error. The status deriver treats `Other` entries as activity (their
/// timestamp advances `last_activity_at`) but not as state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    /// User role with plain-string content.
    UserPrompt { text: String },

    /// User role carrying a tool-result payload.
    ToolResult,

    /// Assistant role without a tool-use payload (streamed text).
    AssistantText,

    /// Assistant role with a tool-use payload.
    AssistantToolUse(ToolUse),

    /// System record bearing a turn-duration or stop-hook payload.
    TurnEnd,

    /// Anything else (summaries, meta records, unknown shapes).
    Other,
}

impl EntryKind {
    /// Returns the display label for this entry kind.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::UserPrompt { .. } => "user_prompt",
            Self::ToolResult => "tool_result",
            Self::AssistantText => "assistant_text",
            Self::AssistantToolUse(_) => "assistant_tool_use",
            Self::TurnEnd => "turn_end",
            Self::Other => "other",
        }
    }
}

/// One immutable parsed log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    /// Structural classification of the line
    pub kind: EntryKind,

    /// Entry timestamp. Lines without a parseable timestamp receive the
    /// read time, so `last_activity_at` never goes backwards.
    pub timestamp: DateTime<Utc>,
}

impl RawEntry {
    pub fn new(kind: EntryKind, timestamp: DateTime<Utc>) -> Self {
        Self { kind, timestamp }
    }

    /// Returns true for user/assistant conversation entries.
    ///
    /// These are the entries counted by `message_count`.
    #[must_use]
    pub fn is_message(&self) -> bool {
        matches!(
            self.kind,
            EntryKind::UserPrompt { .. }
                | EntryKind::ToolResult
                | EntryKind::AssistantText
                | EntryKind::AssistantToolUse(_)
        )
    }

    /// Returns the prompt text if this is a non-empty user prompt.
    ///
    /// Whitespace-only prompts are not "meaningful" and return `None`;
    /// the displayed goal is the last meaningful prompt.
    #[must_use]
    pub fn meaningful_prompt(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::UserPrompt { text } => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: EntryKind) -> RawEntry {
        RawEntry::new(kind, Utc::now())
    }

    #[test]
    fn test_is_message_classification() {
        assert!(entry(EntryKind::UserPrompt {
            text: "hi".to_string()
        })
        .is_message());
        assert!(entry(EntryKind::ToolResult).is_message());
        assert!(entry(EntryKind::AssistantText).is_message());
        assert!(entry(EntryKind::AssistantToolUse(ToolUse::new("Bash", None))).is_message());
        assert!(!entry(EntryKind::TurnEnd).is_message());
        assert!(!entry(EntryKind::Other).is_message());
    }

    #[test]
    fn test_meaningful_prompt_trims_whitespace() {
        let e = entry(EntryKind::UserPrompt {
            text: "  build X  ".to_string(),
        });
        assert_eq!(e.meaningful_prompt(), Some("build X"));
    }

    #[test]
    fn test_whitespace_prompt_is_not_meaningful() {
        let e = entry(EntryKind::UserPrompt {
            text: "   \n\t".to_string(),
        });
        assert_eq!(e.meaningful_prompt(), None);
    }

    #[test]
    fn test_tool_use_display() {
        let tool = ToolUse::new("Bash", Some("ls".to_string()));
        assert_eq!(tool.to_string(), "Bash(ls)");

        let bare = ToolUse::new("Read", None);
        assert_eq!(bare.to_string(), "Read");
    }
}
