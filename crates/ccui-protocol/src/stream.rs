//! Change records on the session stream.
//!
//! The publisher appends one [`ChangeRecord`] per registry event to its
//! on-disk log and delivers them newline-delimited over HTTP. Sequence
//! numbers are monotonic and gap-free per stream; clients resume with
//! `?from=<seq>` and materialize idempotently by primary key.

use ccui_core::{SessionId, SessionSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation carried by a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Why a waiting transition is being surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    WaitingForInput,
    NeedsApproval,
}

/// Notification payload present only on the update record whose status
/// transition was working -> waiting. Consumers deduplicate by
/// sessionId + timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
}

/// One record on the session change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Monotonic, gap-free sequence number within the stream
    pub seq: u64,

    /// Operation kind
    pub op: ChangeOp,

    /// Primary key (session id)
    pub pk: SessionId,

    /// Full post-image for insert/update; absent for delete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<SessionSnapshot>,

    /// Present only on working -> waiting updates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<StatusNotification>,
}

impl ChangeRecord {
    /// Creates an insert record.
    pub fn insert(seq: u64, snapshot: SessionSnapshot) -> Self {
        Self {
            seq,
            op: ChangeOp::Insert,
            pk: snapshot.session_id.clone(),
            value: Some(snapshot),
            notification: None,
        }
    }

    /// Creates an update record.
    pub fn update(
        seq: u64,
        snapshot: SessionSnapshot,
        notification: Option<StatusNotification>,
    ) -> Self {
        Self {
            seq,
            op: ChangeOp::Update,
            pk: snapshot.session_id.clone(),
            value: Some(snapshot),
            notification,
        }
    }

    /// Creates a delete record.
    pub fn delete(seq: u64, session_id: SessionId) -> Self {
        Self {
            seq,
            op: ChangeOp::Delete,
            pk: session_id,
            value: None,
            notification: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ccui_core::SessionStatus;

    fn snapshot(id: &str) -> SessionSnapshot {
        let ts = Utc
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_else(Utc::now);
        SessionSnapshot {
            session_id: SessionId::new(id),
            hostname: "local".to_string(),
            cwd: "/w".to_string(),
            git_branch: None,
            git_repo_id: None,
            original_prompt: Some("build X".to_string()),
            goal: Some("build X".to_string()),
            summary: None,
            pr: None,
            started_at: ts,
            last_activity_at: ts,
            status: SessionStatus::Working,
            has_pending_tool_use: false,
            pending_tool: None,
            message_count: 1,
        }
    }

    #[test]
    fn test_insert_record_wire_shape() {
        let record = ChangeRecord::insert(1, snapshot("s1"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"seq\":1"));
        assert!(json.contains("\"op\":\"insert\""));
        assert!(json.contains("\"pk\":\"s1\""));
        assert!(json.contains("\"value\""));
        assert!(!json.contains("notification"));
    }

    #[test]
    fn test_delete_record_has_no_value() {
        let record = ChangeRecord::delete(7, SessionId::new("s1"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"op\":\"delete\""));
        assert!(!json.contains("\"value\""));
    }

    #[test]
    fn test_notification_wire_shape() {
        let ts = Utc
            .timestamp_opt(1_700_000_005, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let record = ChangeRecord::update(
            2,
            snapshot("s1"),
            Some(StatusNotification {
                kind: NotificationKind::NeedsApproval,
                timestamp: ts,
            }),
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"notification\""));
        assert!(json.contains("\"type\":\"needs_approval\""));
    }

    #[test]
    fn test_round_trip() {
        let record = ChangeRecord::update(3, snapshot("s2"), None);
        let json = serde_json::to_string(&record).unwrap();
        let back: ChangeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
