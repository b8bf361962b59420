//! End-to-end pipeline tests: log file -> tailer -> registry -> events.
//!
//! These tests drive the real watcher against a temp directory and
//! assert the derived session stream. Timing-rule coverage lives in
//! `registry_integration.rs` with a fixed clock; here the clock is real
//! and only structural transitions are asserted.

use std::fs;
use std::io::Write;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use ccui_core::{SessionStatus, DEFAULT_IDLE_TIMEOUT};
use ccuid::registry::{spawn_registry, SessionEvent};
use ccuid::tailer::{spawn_tailer, WatchRoot};

fn user_line(text: &str, ts: &str) -> String {
    format!(
        r#"{{"type":"user","sessionId":"abc","cwd":"/w","timestamp":"{ts}","message":{{"role":"user","content":"{text}"}}}}"#
    )
}

async fn expect_event(
    rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> SessionEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within 5s")
        .expect("event channel open")
}

#[tokio::test]
async fn test_file_lifecycle_create_update_delete() {
    let root = tempfile::TempDir::new().expect("temp dir");
    let project = root.path().join("-home-u-w");
    fs::create_dir_all(&project).expect("project dir");

    let registry = spawn_registry(DEFAULT_IDLE_TIMEOUT);
    let mut events = registry.subscribe();

    let cancel = CancellationToken::new();
    let tailer = spawn_tailer(
        vec![WatchRoot {
            root: root.path().to_path_buf(),
            hostname: "local".to_string(),
        }],
        registry.clone(),
        cancel.clone(),
    );

    // Give the watcher a moment to install
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Seed the log: session appears as working with the prompt as goal
    let log = project.join("abc.jsonl");
    fs::write(&log, format!("{}\n", user_line("build X", "2099-01-01T10:00:00Z")))
        .expect("write log");

    match expect_event(&mut events).await {
        SessionEvent::Created { snapshot } => {
            assert_eq!(snapshot.session_id.as_str(), "abc");
            assert_eq!(snapshot.cwd, "/w");
            assert_eq!(snapshot.hostname, "local");
            assert_eq!(snapshot.status, SessionStatus::Working);
            assert_eq!(snapshot.goal.as_deref(), Some("build X"));
            assert_eq!(snapshot.message_count, 1);
        }
        other => panic!("expected Created, got {other:?}"),
    }

    // Append another prompt: message count grows
    {
        let mut file = fs::OpenOptions::new().append(true).open(&log).expect("open");
        writeln!(file, "{}", user_line("and then Y", "2099-01-01T10:00:10Z")).expect("append");
    }

    match expect_event(&mut events).await {
        SessionEvent::Updated { snapshot, .. } => {
            assert_eq!(snapshot.message_count, 2);
            assert_eq!(snapshot.goal.as_deref(), Some("and then Y"));
        }
        other => panic!("expected Updated, got {other:?}"),
    }

    // Unlink: the session is deleted
    fs::remove_file(&log).expect("remove log");

    match expect_event(&mut events).await {
        SessionEvent::Deleted { session_id, .. } => {
            assert_eq!(session_id.as_str(), "abc");
        }
        other => panic!("expected Deleted, got {other:?}"),
    }

    cancel.cancel();
    let _ = tailer.await;
}

#[tokio::test]
async fn test_preexisting_file_is_seeded_at_startup() {
    let root = tempfile::TempDir::new().expect("temp dir");
    let project = root.path().join("-home-u-w");
    fs::create_dir_all(&project).expect("project dir");
    fs::write(
        project.join("f0e1d2c3.jsonl"),
        format!("{}\n", user_line("seeded", "2099-01-01T10:00:00Z")),
    )
    .expect("write log");

    let registry = spawn_registry(DEFAULT_IDLE_TIMEOUT);
    let mut events = registry.subscribe();

    let cancel = CancellationToken::new();
    let tailer = spawn_tailer(
        vec![WatchRoot {
            root: root.path().to_path_buf(),
            hostname: "local".to_string(),
        }],
        registry.clone(),
        cancel.clone(),
    );

    match expect_event(&mut events).await {
        SessionEvent::Created { snapshot } => {
            assert_eq!(snapshot.session_id.as_str(), "f0e1d2c3");
            assert_eq!(snapshot.goal.as_deref(), Some("seeded"));
        }
        other => panic!("expected Created, got {other:?}"),
    }

    cancel.cancel();
    let _ = tailer.await;
}

#[tokio::test]
async fn test_sub_session_logs_are_ignored() {
    let root = tempfile::TempDir::new().expect("temp dir");
    let project = root.path().join("-home-u-w");
    fs::create_dir_all(&project).expect("project dir");

    let registry = spawn_registry(DEFAULT_IDLE_TIMEOUT);
    let mut events = registry.subscribe();

    let cancel = CancellationToken::new();
    let tailer = spawn_tailer(
        vec![WatchRoot {
            root: root.path().to_path_buf(),
            hostname: "local".to_string(),
        }],
        registry.clone(),
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;

    fs::write(
        project.join("agent-sub1.jsonl"),
        format!("{}\n", user_line("subagent", "2099-01-01T10:00:00Z")),
    )
    .expect("write sub-session log");

    // Then a real session; its Created must be the first event we see
    fs::write(
        project.join("abc.jsonl"),
        format!("{}\n", user_line("main", "2099-01-01T10:00:01Z")),
    )
    .expect("write log");

    match expect_event(&mut events).await {
        SessionEvent::Created { snapshot } => {
            assert_eq!(snapshot.session_id.as_str(), "abc");
        }
        other => panic!("expected Created for abc, got {other:?}"),
    }

    cancel.cancel();
    let _ = tailer.await;
}

#[tokio::test]
async fn test_malformed_lines_do_not_stall_the_pipeline() {
    let root = tempfile::TempDir::new().expect("temp dir");
    let project = root.path().join("-home-u-w");
    fs::create_dir_all(&project).expect("project dir");

    let registry = spawn_registry(DEFAULT_IDLE_TIMEOUT);
    let mut events = registry.subscribe();

    let cancel = CancellationToken::new();
    let tailer = spawn_tailer(
        vec![WatchRoot {
            root: root.path().to_path_buf(),
            hostname: "local".to_string(),
        }],
        registry.clone(),
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;

    // A garbage line followed by a valid one: the session still forms
    fs::write(
        project.join("abc.jsonl"),
        format!(
            "this is not json\n{}\n",
            user_line("valid", "2099-01-01T10:00:00Z")
        ),
    )
    .expect("write log");

    match expect_event(&mut events).await {
        SessionEvent::Created { snapshot } => {
            assert_eq!(snapshot.message_count, 1);
            assert_eq!(snapshot.goal.as_deref(), Some("valid"));
        }
        other => panic!("expected Created, got {other:?}"),
    }

    cancel.cancel();
    let _ = tailer.await;
}
