//! Idempotency Integration Tests
//!
//! Tests for replayed and concurrent step and event creation against a
//! shared database file.

use std::path::Path;
use std::sync::Arc;

use runledger::core::{step_key, Ledger, Outcome};
use runledger::domain::{EventData, NewEvent};
use runledger::{LedgerConfig, NewRun};
use tempfile::TempDir;
use uuid::Uuid;

async fn open_ledger(temp: &TempDir) -> Ledger {
    Ledger::open(&LedgerConfig::with_home(temp.path())).await.unwrap()
}

async fn seed_run(ledger: &Ledger) -> Uuid {
    ledger
        .register_project("p1", "Project", Path::new("/projects/p1"))
        .await
        .unwrap();
    ledger
        .create_run(NewRun::new("wf", "p1", "u1"))
        .await
        .unwrap()
        .id
}

async fn count_rows(ledger: &Ledger, run_id: Uuid, key: &str) -> i64 {
    let key = key.to_string();
    ledger
        .database()
        .call(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM workflow_run_steps
                 WHERE run_id = ?1 AND external_step_key = ?2",
                rusqlite::params![run_id.to_string(), key],
                |row| row.get(0),
            )?)
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_replayed_step_returns_same_row() {
    let temp = TempDir::new().unwrap();
    let ledger = open_ledger(&temp).await;
    let run_id = seed_run(&ledger).await;

    let first = ledger
        .find_or_create_step(run_id, "k1", "Build", Some("build"))
        .await
        .unwrap();
    let second = ledger
        .find_or_create_step(run_id, "k1", "Build", Some("build"))
        .await
        .unwrap();

    assert!(first.was_created());
    assert!(matches!(second, Outcome::Existing(_)));
    assert_eq!(first.get().id, second.get().id);
    assert_eq!(count_rows(&ledger, run_id, "k1").await, 1);
}

#[tokio::test]
async fn test_replay_survives_reopen() {
    let temp = TempDir::new().unwrap();

    let (run_id, step_id) = {
        let ledger = open_ledger(&temp).await;
        let run_id = seed_run(&ledger).await;
        let step = ledger
            .find_or_create_step(run_id, "k1", "Build", None)
            .await
            .unwrap();
        (run_id, step.get().id)
    };

    // A new process replaying the workflow sees the stored row
    let ledger = open_ledger(&temp).await;
    let replay = ledger.find_or_create_step(run_id, "k1", "Build", None).await.unwrap();
    assert!(!replay.was_created());
    assert_eq!(replay.get().id, step_id);
}

#[tokio::test]
async fn test_concurrent_replays_in_one_ledger() {
    let temp = TempDir::new().unwrap();
    let ledger = Arc::new(open_ledger(&temp).await);
    let run_id = seed_run(&ledger).await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger.find_or_create_step(run_id, "k1", "Build", None).await
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().unwrap());
    }

    let created = outcomes.iter().filter(|o| o.was_created()).count();
    assert_eq!(created, 1);
    let id = outcomes[0].get().id;
    assert!(outcomes.iter().all(|o| o.get().id == id));
    assert_eq!(count_rows(&ledger, run_id, "k1").await, 1);
}

#[tokio::test]
async fn test_concurrent_replays_across_connections() {
    let temp = TempDir::new().unwrap();

    // Several ledgers (as separate worker processes would) on one file
    let mut ledgers = Vec::new();
    for _ in 0..4 {
        ledgers.push(Arc::new(open_ledger(&temp).await));
    }
    let run_id = seed_run(&ledgers[0]).await;

    let tasks: Vec<_> = (0..12)
        .map(|i| {
            let ledger = Arc::clone(&ledgers[i % ledgers.len()]);
            tokio::spawn(async move {
                ledger.find_or_create_step(run_id, "deploy-1", "Deploy", Some("deploy")).await
            })
        })
        .collect();

    let mut created = 0;
    let mut ids = Vec::new();
    for task in tasks {
        // No caller ever observes a duplicate-key failure
        let outcome = task.await.unwrap().expect("find_or_create_step failed");
        if outcome.was_created() {
            created += 1;
        }
        ids.push(outcome.into_inner().id);
    }

    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(count_rows(&ledgers[0], run_id, "deploy-1").await, 1);
}

#[tokio::test]
async fn test_concurrent_keyed_events_across_connections() {
    let temp = TempDir::new().unwrap();

    let mut ledgers = Vec::new();
    for _ in 0..4 {
        ledgers.push(Arc::new(open_ledger(&temp).await));
    }
    let run_id = seed_run(&ledgers[0]).await;

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let ledger = Arc::clone(&ledgers[i % ledgers.len()]);
            tokio::spawn(async move {
                let event = NewEvent::new(run_id, EventData::annotation("Checkpoint", "reached"))
                    .with_key("checkpoint-1");
                ledger.find_or_create_event(event).await
            })
        })
        .collect();

    let mut created = 0;
    let mut existing = 0;
    let mut ids = Vec::new();
    for task in tasks {
        match task.await.unwrap().expect("find_or_create_event failed") {
            Outcome::Created(event) => {
                created += 1;
                ids.push(event.id);
            }
            Outcome::Existing(event) => {
                existing += 1;
                ids.push(event.id);
            }
        }
    }

    assert_eq!(created, 1);
    assert_eq!(existing, 15);
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let stored = ledgers[0].list_events(run_id, None).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, ids[0]);
}

#[tokio::test]
async fn test_derived_keys_are_replay_stable() {
    let temp = TempDir::new().unwrap();
    let ledger = open_ledger(&temp).await;
    let run_id = seed_run(&ledger).await;

    let input = r#"{"url": "https://example.com"}"#;
    let first = ledger
        .find_or_create_step(run_id, &step_key("fetch", input), "Fetch", None)
        .await
        .unwrap();
    let replay = ledger
        .find_or_create_step(run_id, &step_key("fetch", input), "Fetch", None)
        .await
        .unwrap();
    let other = ledger
        .find_or_create_step(run_id, &step_key("fetch", "{}"), "Fetch", None)
        .await
        .unwrap();

    assert_eq!(first.get().id, replay.get().id);
    assert!(other.was_created());
    assert_eq!(ledger.list_steps(run_id).await.unwrap().len(), 2);
}
