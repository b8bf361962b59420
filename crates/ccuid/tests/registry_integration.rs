//! Integration tests for the Registry Actor.
//!
//! These tests verify the registry works correctly as a complete system
//! through the spawn_registry_with_clock() + RegistryHandle interface,
//! with a movable fixed clock so every timing rule runs deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::time::timeout;

use ccui_core::{EntryKind, RawEntry, SessionId, SessionStatus, ToolUse, DEFAULT_IDLE_TIMEOUT};
use ccui_protocol::transcript::SessionMeta;
use ccui_protocol::NotificationKind;
use ccuid::registry::{
    spawn_registry_with_clock, Clock, FileBatch, RegistryHandle, SessionEvent,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// A clock the test can move forward.
#[derive(Clone)]
struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(base_time(0))),
        }
    }

    fn set(&self, secs: i64) {
        if let Ok(mut now) = self.now.lock() {
            *now = base_time(secs);
        }
    }

    fn as_clock(&self) -> Clock {
        let now = Arc::clone(&self.now);
        Arc::new(move || now.lock().map(|t| *t).unwrap_or_else(|_| Utc::now()))
    }
}

fn base_time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid test timestamp")
}

fn spawn_with_clock() -> (RegistryHandle, TestClock) {
    let clock = TestClock::new();
    let handle = spawn_registry_with_clock(DEFAULT_IDLE_TIMEOUT, clock.as_clock());
    (handle, clock)
}

fn prompt(text: &str, secs: i64) -> RawEntry {
    RawEntry::new(
        EntryKind::UserPrompt {
            text: text.to_string(),
        },
        base_time(secs),
    )
}

fn tool_use(name: &str, target: &str, secs: i64) -> RawEntry {
    RawEntry::new(
        EntryKind::AssistantToolUse(ToolUse::new(name, Some(target.to_string()))),
        base_time(secs),
    )
}

fn batch(id: &str, cwd: &str, entries: Vec<RawEntry>, offset: u64) -> FileBatch {
    FileBatch {
        session_id: SessionId::new(id),
        hostname: "local".to_string(),
        meta: Some(SessionMeta {
            session_id: id.to_string(),
            cwd: Some(cwd.to_string()),
            git_branch: None,
            started_at: Some(base_time(0)),
        }),
        entries,
        byte_position: offset,
        reset: false,
    }
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within 2s")
        .expect("channel open")
}

// ============================================================================
// Scenario S1: first prompt creates a working session
// ============================================================================

#[tokio::test]
async fn test_seed_prompt_creates_working_session() {
    let (handle, clock) = spawn_with_clock();
    let mut events = handle.subscribe();

    clock.set(1);
    handle
        .apply_batch(batch("a", "/w", vec![prompt("build X", 0)], 64))
        .await
        .expect("batch should apply");

    match next_event(&mut events).await {
        SessionEvent::Created { snapshot } => {
            assert_eq!(snapshot.session_id.as_str(), "a");
            assert_eq!(snapshot.status, SessionStatus::Working);
            assert_eq!(snapshot.goal.as_deref(), Some("build X"));
            assert_eq!(snapshot.message_count, 1);
        }
        other => panic!("expected Created, got {other:?}"),
    }
}

// ============================================================================
// Scenario S2: pending tool flips to needs-approval by timer alone
// ============================================================================

#[tokio::test]
async fn test_pending_tool_needs_approval_without_file_activity() {
    let (handle, clock) = spawn_with_clock();
    let mut events = handle.subscribe();

    clock.set(1);
    handle
        .apply_batch(batch(
            "a",
            "/w",
            vec![prompt("build X", 0), tool_use("Bash", "ls", 1)],
            128,
        ))
        .await
        .expect("batch should apply");
    let _ = next_event(&mut events).await; // Created (working)

    // Move past the 5 s approval threshold; only the ticker acts now.
    clock.set(7);
    handle.recheck_timeouts().await;

    match next_event(&mut events).await {
        SessionEvent::Updated {
            snapshot,
            notification,
        } => {
            assert_eq!(snapshot.status, SessionStatus::Waiting);
            assert!(snapshot.has_pending_tool_use);
            let pending = snapshot.pending_tool.expect("pending tool recorded");
            assert_eq!(pending.name, "Bash");
            assert_eq!(pending.target.as_deref(), Some("ls"));

            let notification = notification.expect("transition carries notification");
            assert_eq!(notification.kind, NotificationKind::NeedsApproval);
        }
        other => panic!("expected Updated, got {other:?}"),
    }
}

// ============================================================================
// Scenario S3: tool result resumes work, turn end waits for input
// ============================================================================

#[tokio::test]
async fn test_tool_result_then_turn_end() {
    let (handle, clock) = spawn_with_clock();
    let mut events = handle.subscribe();

    clock.set(1);
    handle
        .apply_batch(batch(
            "a",
            "/w",
            vec![prompt("go", 0), tool_use("Bash", "ls", 1)],
            128,
        ))
        .await
        .expect("batch should apply");
    let _ = next_event(&mut events).await;

    clock.set(7);
    handle.recheck_timeouts().await;
    let _ = next_event(&mut events).await; // waiting + pending

    // Tool result arrives: back to working
    clock.set(7);
    handle
        .apply_batch(batch(
            "a",
            "/w",
            vec![RawEntry::new(EntryKind::ToolResult, base_time(6))],
            192,
        ))
        .await
        .expect("batch should apply");

    match next_event(&mut events).await {
        SessionEvent::Updated { snapshot, .. } => {
            assert_eq!(snapshot.status, SessionStatus::Working);
            assert!(!snapshot.has_pending_tool_use);
        }
        other => panic!("expected Updated, got {other:?}"),
    }

    // Turn end: waiting for input (no pending tool)
    clock.set(8);
    handle
        .apply_batch(batch(
            "a",
            "/w",
            vec![RawEntry::new(EntryKind::TurnEnd, base_time(7))],
            256,
        ))
        .await
        .expect("batch should apply");

    match next_event(&mut events).await {
        SessionEvent::Updated {
            snapshot,
            notification,
        } => {
            assert_eq!(snapshot.status, SessionStatus::Waiting);
            assert!(!snapshot.has_pending_tool_use);
            let notification = notification.expect("working->waiting carries notification");
            assert_eq!(notification.kind, NotificationKind::WaitingForInput);
        }
        other => panic!("expected Updated, got {other:?}"),
    }
}

// ============================================================================
// Scenario S4: supersession
// ============================================================================

#[tokio::test]
async fn test_supersession_deletes_idle_session_exactly_once() {
    let (handle, clock) = spawn_with_clock();
    let mut events = handle.subscribe();

    clock.set(1);
    handle
        .apply_batch(batch("a", "/w", vec![prompt("old thread", 0)], 64))
        .await
        .expect("batch should apply");
    let _ = next_event(&mut events).await;

    // Age "a" into idle
    clock.set(DEFAULT_IDLE_TIMEOUT.as_secs() as i64 + 120);
    handle.recheck_timeouts().await;
    match next_event(&mut events).await {
        SessionEvent::Updated { snapshot, .. } => {
            assert_eq!(snapshot.status, SessionStatus::Idle)
        }
        other => panic!("expected Updated, got {other:?}"),
    }

    // New session in the same cwd
    let t = DEFAULT_IDLE_TIMEOUT.as_secs() as i64 + 121;
    handle
        .apply_batch(batch("b", "/w", vec![prompt("new thread", t)], 64))
        .await
        .expect("batch should apply");

    let mut deleted_a = 0;
    let mut created_b = false;
    for _ in 0..2 {
        match next_event(&mut events).await {
            SessionEvent::Created { snapshot } => {
                assert_eq!(snapshot.session_id.as_str(), "b");
                created_b = true;
            }
            SessionEvent::Deleted { session_id, .. } => {
                assert_eq!(session_id.as_str(), "a");
                deleted_a += 1;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(created_b);
    assert_eq!(deleted_a, 1, "superseded session deleted exactly once");

    assert!(handle.get_session(SessionId::new("a")).await.is_none());
    assert!(handle.get_session(SessionId::new("b")).await.is_some());
}

#[tokio::test]
async fn test_supersession_skips_working_session() {
    let (handle, clock) = spawn_with_clock();

    clock.set(1);
    handle
        .apply_batch(batch("a", "/w", vec![prompt("active", 0)], 64))
        .await
        .expect("batch should apply");
    handle
        .apply_batch(batch("b", "/w", vec![prompt("new", 1)], 64))
        .await
        .expect("batch should apply");

    // "a" was working, so it survives
    assert!(handle.get_session(SessionId::new("a")).await.is_some());
    assert!(handle.get_session(SessionId::new("b")).await.is_some());
}

// ============================================================================
// Fast idle
// ============================================================================

#[tokio::test]
async fn test_fast_idle_after_assistant_text() {
    let (handle, clock) = spawn_with_clock();
    let mut events = handle.subscribe();

    clock.set(1);
    handle
        .apply_batch(batch(
            "a",
            "/w",
            vec![
                prompt("go", 0),
                RawEntry::new(EntryKind::AssistantText, base_time(1)),
            ],
            128,
        ))
        .await
        .expect("batch should apply");
    let _ = next_event(&mut events).await; // Created, working (0 ms since text)

    // 2 s after the text, well past the 500 ms threshold
    clock.set(3);
    handle.recheck_timeouts().await;

    match next_event(&mut events).await {
        SessionEvent::Updated {
            snapshot,
            notification,
        } => {
            assert_eq!(snapshot.status, SessionStatus::Waiting);
            assert!(!snapshot.has_pending_tool_use);
            assert!(notification.is_some());
        }
        other => panic!("expected Updated, got {other:?}"),
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_file_removed_deletes_session() {
    let (handle, clock) = spawn_with_clock();
    let mut events = handle.subscribe();

    clock.set(1);
    handle
        .apply_batch(batch("a", "/w", vec![prompt("x", 0)], 64))
        .await
        .expect("batch should apply");
    let _ = next_event(&mut events).await;

    handle.file_removed(SessionId::new("a")).await;

    match next_event(&mut events).await {
        SessionEvent::Deleted { session_id, .. } => {
            assert_eq!(session_id.as_str(), "a");
        }
        other => panic!("expected Deleted, got {other:?}"),
    }
    assert!(handle.get_session(SessionId::new("a")).await.is_none());
}

#[tokio::test]
async fn test_get_all_sessions() {
    let (handle, clock) = spawn_with_clock();

    clock.set(1);
    for i in 0..3 {
        handle
            .apply_batch(batch(
                &format!("s{i}"),
                &format!("/w{i}"),
                vec![prompt("x", 0)],
                64,
            ))
            .await
            .expect("batch should apply");
    }

    let sessions = handle.get_all_sessions().await;
    assert_eq!(sessions.len(), 3);
    assert!(handle.is_connected());
}
