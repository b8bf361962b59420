//! Integration tests for the state publisher: persistence, resumption,
//! and idempotent client materialization across reconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use ccui_core::{SessionId, SessionSnapshot, SessionStatus};
use ccui_protocol::{ChangeOp, ChangeRecord};
use ccuid::publisher::{Publisher, StreamStore};
use ccuid::registry::{DeletionReason, SessionEvent};

fn snapshot(id: &str, message_count: usize) -> Box<SessionSnapshot> {
    let now = Utc::now();
    Box::new(SessionSnapshot {
        session_id: SessionId::new(id),
        hostname: "local".to_string(),
        cwd: "/w".to_string(),
        git_branch: None,
        git_repo_id: None,
        original_prompt: Some("build X".to_string()),
        goal: Some("build X".to_string()),
        summary: None,
        pr: None,
        started_at: now,
        last_activity_at: now,
        status: SessionStatus::Working,
        has_pending_tool_use: false,
        pending_tool: None,
        message_count,
    })
}

fn open_publisher(dir: &tempfile::TempDir) -> Arc<Publisher> {
    let store = StreamStore::open(dir.path().join("sessions"), false).expect("store opens");
    Publisher::new(store, Duration::from_secs(24 * 3600))
}

/// A minimal stream consumer: materializes by primary key, discarding
/// records at or below its acknowledged sequence number.
#[derive(Default)]
struct Materializer {
    ack: u64,
    state: HashMap<String, SessionSnapshot>,
}

impl Materializer {
    fn apply(&mut self, record: &ChangeRecord) {
        if record.seq <= self.ack {
            return; // duplicate delivery
        }
        self.ack = record.seq;
        match record.op {
            ChangeOp::Insert | ChangeOp::Update => {
                if let Some(value) = &record.value {
                    self.state.insert(record.pk.as_str().to_string(), value.clone());
                }
            }
            ChangeOp::Delete => {
                self.state.remove(record.pk.as_str());
            }
        }
    }
}

#[tokio::test]
async fn test_materialization_matches_final_state() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let publisher = open_publisher(&dir);

    publisher
        .publish(SessionEvent::Created {
            snapshot: snapshot("a", 1),
        })
        .await;
    publisher
        .publish(SessionEvent::Updated {
            snapshot: snapshot("a", 2),
            notification: None,
        })
        .await;
    publisher
        .publish(SessionEvent::Created {
            snapshot: snapshot("b", 1),
        })
        .await;
    publisher
        .publish(SessionEvent::Deleted {
            session_id: SessionId::new("a"),
            reason: DeletionReason::Superseded,
        })
        .await;

    let subscription = publisher.subscribe_from(0).await.expect("subscribe");
    let mut client = Materializer::default();
    for record in &subscription.replay {
        client.apply(record);
    }

    assert_eq!(client.state.len(), 1);
    assert!(client.state.contains_key("b"));
    assert_eq!(client.ack, 4);
}

#[tokio::test]
async fn test_reconnect_with_overlap_is_idempotent() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let publisher = open_publisher(&dir);

    for i in 1..=3 {
        publisher
            .publish(SessionEvent::Updated {
                snapshot: snapshot("a", i),
                notification: None,
            })
            .await;
    }

    // First connection consumes everything
    let mut client = Materializer::default();
    let subscription = publisher.subscribe_from(0).await.expect("subscribe");
    for record in &subscription.replay {
        client.apply(record);
    }
    assert_eq!(client.ack, 3);

    // More activity while disconnected
    publisher
        .publish(SessionEvent::Updated {
            snapshot: snapshot("a", 9),
            notification: None,
        })
        .await;

    // Reconnect conservatively from an older sequence number: the
    // overlap replays records 2..=4, and only 4 changes state.
    let subscription = publisher.subscribe_from(1).await.expect("subscribe");
    for record in &subscription.replay {
        client.apply(record);
    }

    assert_eq!(client.ack, 4);
    let a = client.state.get("a").expect("session a present");
    assert_eq!(a.message_count, 9);
}

#[tokio::test]
async fn test_replay_then_live_is_gap_free() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let publisher = open_publisher(&dir);

    publisher
        .publish(SessionEvent::Created {
            snapshot: snapshot("a", 1),
        })
        .await;

    let mut subscription = publisher.subscribe_from(0).await.expect("subscribe");

    publisher
        .publish(SessionEvent::Updated {
            snapshot: snapshot("a", 2),
            notification: None,
        })
        .await;

    let mut seqs: Vec<u64> = subscription.replay.iter().map(|r| r.seq).collect();
    let live = tokio::time::timeout(Duration::from_secs(2), subscription.live.recv())
        .await
        .expect("live record within 2s")
        .expect("live channel open");
    seqs.push(live.seq);

    assert_eq!(seqs, vec![1, 2]);
}

#[tokio::test]
async fn test_restart_preserves_sequence_numbers() {
    let dir = tempfile::TempDir::new().expect("temp dir");

    {
        let publisher = open_publisher(&dir);
        publisher
            .publish(SessionEvent::Created {
                snapshot: snapshot("a", 1),
            })
            .await;
        publisher
            .publish(SessionEvent::Created {
                snapshot: snapshot("b", 1),
            })
            .await;
    }

    // Reopen: the next record continues the sequence
    let publisher = open_publisher(&dir);
    publisher
        .publish(SessionEvent::Created {
            snapshot: snapshot("c", 1),
        })
        .await;

    let subscription = publisher.subscribe_from(0).await.expect("subscribe");
    let seqs: Vec<u64> = subscription.replay.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}
