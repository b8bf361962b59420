//! Decoding agent conversation-log lines.
//!
//! Each log line is a dynamic JSON record. This module decodes it through
//! a schema layer into a tagged [`RawEntry`]; unknown shapes become
//! `EntryKind::Other` and are never a parse error. Only syntactically
//! invalid JSON is an error, and that is the caller's to skip.
//!
//! Classification is strictly structural:
//!
//! | Shape | Trigger |
//! |---|---|
//! | user prompt | user role, content is a plain string |
//! | tool result | user role, content blocks carry a tool_result |
//! | assistant text | assistant role, no tool_use block |
//! | assistant tool use | assistant role with a tool_use block |
//! | turn end | system record with turn-duration or stop-hook payload |

use ccui_core::{EntryKind, RawEntry, ToolUse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Maximum length of a normalized tool target.
const MAX_TARGET_LEN: usize = 120;

/// Input fields probed for a tool target, in order: path-like first,
/// then command-like.
const TARGET_FIELDS: [&str; 6] = [
    "file_path",
    "path",
    "notebook_path",
    "command",
    "pattern",
    "url",
];

/// Raw JSON structure of one conversation-log line.
///
/// Every field is optional: the agent writes several record flavors into
/// the same file and the schema must absorb all of them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTranscriptLine {
    /// Record type ("user", "assistant", "system", "summary", ...)
    #[serde(rename = "type", default)]
    pub record_type: Option<String>,

    /// Conversation message payload
    #[serde(default)]
    pub message: Option<RawMessage>,

    /// ISO-8601 timestamp
    #[serde(default)]
    pub timestamp: Option<String>,

    /// Session identifier, present on conversation records
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,

    /// Working directory, present on conversation records
    #[serde(default)]
    pub cwd: Option<String>,

    /// Git branch at record time
    #[serde(rename = "gitBranch", default)]
    pub git_branch: Option<String>,

    /// System record subtype (e.g. "stop_hook")
    #[serde(default)]
    pub subtype: Option<String>,

    /// Turn duration, present on turn-end system records
    #[serde(rename = "durationMs", alias = "duration_ms", default)]
    pub duration_ms: Option<u64>,

    /// Sub-session marker; sidechain records never create sessions
    #[serde(rename = "isSidechain", default)]
    pub is_sidechain: bool,
}

/// Message payload of a conversation record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub content: Option<RawContent>,
}

/// Message content: either a plain string or a list of typed blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Blocks(Vec<RawBlock>),
}

/// One content block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBlock {
    #[serde(rename = "type", default)]
    pub block_type: Option<String>,

    /// Tool name (tool_use blocks)
    #[serde(default)]
    pub name: Option<String>,

    /// Tool input (tool_use blocks)
    #[serde(default)]
    pub input: Option<Value>,
}

impl RawTranscriptLine {
    /// Decodes one log line.
    ///
    /// Returns `Err` only for syntactically invalid JSON.
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Returns the parsed entry timestamp, if the record carries one.
    #[must_use]
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Classifies this record into a tagged entry.
    ///
    /// `fallback` stands in for a missing or unparseable timestamp so
    /// that activity tracking never moves backwards.
    #[must_use]
    pub fn classify(&self, fallback: DateTime<Utc>) -> RawEntry {
        let timestamp = self.parsed_timestamp().unwrap_or(fallback);
        RawEntry::new(self.kind(), timestamp)
    }

    fn kind(&self) -> EntryKind {
        let role = self
            .message
            .as_ref()
            .and_then(|m| m.role.as_deref())
            .or(self.record_type.as_deref());

        match role {
            Some("user") => self.classify_user(),
            Some("assistant") => self.classify_assistant(),
            Some("system") => self.classify_system(),
            _ => EntryKind::Other,
        }
    }

    fn classify_user(&self) -> EntryKind {
        match self.message.as_ref().and_then(|m| m.content.as_ref()) {
            Some(RawContent::Text(text)) => EntryKind::UserPrompt { text: text.clone() },
            Some(RawContent::Blocks(blocks)) => {
                if blocks
                    .iter()
                    .any(|b| b.block_type.as_deref() == Some("tool_result"))
                {
                    EntryKind::ToolResult
                } else {
                    EntryKind::Other
                }
            }
            None => EntryKind::Other,
        }
    }

    fn classify_assistant(&self) -> EntryKind {
        if let Some(RawContent::Blocks(blocks)) =
            self.message.as_ref().and_then(|m| m.content.as_ref())
        {
            if let Some(block) = blocks
                .iter()
                .find(|b| b.block_type.as_deref() == Some("tool_use"))
            {
                let name = block.name.clone().unwrap_or_else(|| "unknown".to_string());
                let target = block.input.as_ref().and_then(extract_target);
                return EntryKind::AssistantToolUse(ToolUse::new(name, target));
            }
        }
        EntryKind::AssistantText
    }

    fn classify_system(&self) -> EntryKind {
        let is_stop_hook = self
            .subtype
            .as_deref()
            .is_some_and(|s| s.starts_with("stop_hook"));
        if self.duration_ms.is_some() || is_stop_hook {
            EntryKind::TurnEnd
        } else {
            EntryKind::Other
        }
    }

    /// Extracts session metadata carried on this record, if any.
    ///
    /// Conversation records repeat sessionId/cwd on every line; the
    /// registry keeps the first complete set it sees.
    #[must_use]
    pub fn meta(&self) -> Option<SessionMeta> {
        let session_id = self.session_id.clone()?;
        Some(SessionMeta {
            session_id,
            cwd: self.cwd.clone(),
            git_branch: self.git_branch.clone(),
            started_at: self.parsed_timestamp(),
        })
    }
}

/// Session metadata extracted from the first records of a log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMeta {
    pub session_id: String,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionMeta {
    /// Fills missing fields from a later record. First writer wins per
    /// field; existing values are never overwritten.
    pub fn merge(&mut self, other: &SessionMeta) {
        if self.cwd.is_none() {
            self.cwd = other.cwd.clone();
        }
        if self.git_branch.is_none() {
            self.git_branch = other.git_branch.clone();
        }
        if self.started_at.is_none() {
            self.started_at = other.started_at;
        }
    }

    /// A session may be published once its working directory and start
    /// time are known.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.cwd.is_some() && self.started_at.is_some()
    }
}

/// Picks the first path-like or command-like input field and normalizes
/// it: first line only, trimmed, bounded length.
fn extract_target(input: &Value) -> Option<String> {
    let object = input.as_object()?;
    for field in TARGET_FIELDS {
        if let Some(value) = object.get(field).and_then(Value::as_str) {
            let normalized = normalize_target(value);
            if !normalized.is_empty() {
                return Some(normalized);
            }
        }
    }
    None
}

fn normalize_target(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or("").trim();
    if first_line.len() <= MAX_TARGET_LEN {
        return first_line.to_string();
    }
    let mut cut = MAX_TARGET_LEN;
    while cut > 0 && !first_line.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = first_line.get(..cut).unwrap_or("");
    format!("{head}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fallback() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn classify(line: &str) -> EntryKind {
        RawTranscriptLine::decode(line)
            .unwrap()
            .classify(fallback())
            .kind
    }

    #[test]
    fn test_user_prompt_plain_string() {
        let kind = classify(
            r#"{"type":"user","message":{"role":"user","content":"build X"},"timestamp":"2024-05-01T10:00:00Z","sessionId":"abc","cwd":"/w"}"#,
        );
        assert_eq!(
            kind,
            EntryKind::UserPrompt {
                text: "build X".to_string()
            }
        );
    }

    #[test]
    fn test_tool_result_blocks() {
        let kind = classify(
            r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"ok"}]}}"#,
        );
        assert_eq!(kind, EntryKind::ToolResult);
    }

    #[test]
    fn test_assistant_streaming_text() {
        let kind = classify(
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Sure, I'll..."}]}}"#,
        );
        assert_eq!(kind, EntryKind::AssistantText);
    }

    #[test]
    fn test_assistant_tool_use_with_command_target() {
        let kind = classify(
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"ls -la"}}]}}"#,
        );
        assert_eq!(
            kind,
            EntryKind::AssistantToolUse(ToolUse::new("Bash", Some("ls -la".to_string())))
        );
    }

    #[test]
    fn test_assistant_tool_use_prefers_path_over_command() {
        let kind = classify(
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","name":"Edit","input":{"command":"x","file_path":"/w/src/main.rs"}}]}}"#,
        );
        assert_eq!(
            kind,
            EntryKind::AssistantToolUse(ToolUse::new("Edit", Some("/w/src/main.rs".to_string())))
        );
    }

    #[test]
    fn test_turn_end_by_duration() {
        let kind = classify(r#"{"type":"system","durationMs":4120}"#);
        assert_eq!(kind, EntryKind::TurnEnd);
    }

    #[test]
    fn test_turn_end_by_stop_hook() {
        let kind = classify(r#"{"type":"system","subtype":"stop_hook_summary"}"#);
        assert_eq!(kind, EntryKind::TurnEnd);
    }

    #[test]
    fn test_plain_system_record_is_other() {
        let kind = classify(r#"{"type":"system","content":"compacting"}"#);
        assert_eq!(kind, EntryKind::Other);
    }

    #[test]
    fn test_unknown_record_is_other_not_error() {
        let kind = classify(r#"{"type":"summary","summary":"Working on X"}"#);
        assert_eq!(kind, EntryKind::Other);
    }

    #[test]
    fn test_timestamp_fallback() {
        let entry = RawTranscriptLine::decode(r#"{"type":"summary"}"#)
            .unwrap()
            .classify(fallback());
        assert_eq!(entry.timestamp, fallback());
    }

    #[test]
    fn test_meta_extraction_and_merge() {
        let first = RawTranscriptLine::decode(
            r#"{"type":"user","sessionId":"abc","timestamp":"2024-05-01T10:00:00Z","message":{"role":"user","content":"hi"}}"#,
        )
        .unwrap();
        let second = RawTranscriptLine::decode(
            r#"{"type":"assistant","sessionId":"abc","cwd":"/w","gitBranch":"main","timestamp":"2024-05-01T10:00:01Z"}"#,
        )
        .unwrap();

        let mut meta = first.meta().unwrap();
        assert!(!meta.is_complete());

        meta.merge(&second.meta().unwrap());
        assert!(meta.is_complete());
        assert_eq!(meta.cwd.as_deref(), Some("/w"));
        assert_eq!(meta.git_branch.as_deref(), Some("main"));
        // started_at keeps the first record's timestamp
        assert_eq!(
            meta.started_at,
            DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
                .ok()
                .map(|t| t.with_timezone(&Utc))
        );
    }

    #[test]
    fn test_normalize_target_multiline_command() {
        let normalized = normalize_target("cargo build\ncargo test");
        assert_eq!(normalized, "cargo build");
    }

    #[test]
    fn test_normalize_target_truncates() {
        let long = "x".repeat(300);
        let normalized = normalize_target(&long);
        assert!(normalized.chars().count() <= MAX_TARGET_LEN + 1);
        assert!(normalized.ends_with('…'));
    }
}
