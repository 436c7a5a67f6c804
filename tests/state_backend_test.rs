use serde_json::json;
use stack_provider::{Error, SqliteStateBackend, StateBackend};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Helper to create a temp directory for tests
fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

async fn open_in(dir: &TempDir) -> SqliteStateBackend {
    SqliteStateBackend::open(dir.path().join("state.db"))
        .await
        .expect("open state db")
}

#[tokio::test]
async fn test_lock_expires_after_ttl() {
    let temp_dir = create_test_dir();
    let backend = open_in(&temp_dir).await;

    backend.acquire_lock("stack-a", "worker-1", 5).await.unwrap();

    let err = backend
        .acquire_lock("stack-a", "worker-2", 5)
        .await
        .unwrap_err();
    match &err {
        Error::LockConflict { holder, .. } => assert_eq!(holder, "worker-1"),
        other => panic!("expected LockConflict, got {:?}", other),
    }
    assert!(err.to_string().contains("worker-1"));

    tokio::time::sleep(Duration::from_secs(6)).await;

    backend
        .acquire_lock("stack-a", "worker-2", 5)
        .await
        .expect("expired lock is taken over");
    let lock = backend.check_lock("stack-a").await.unwrap().unwrap();
    assert_eq!(lock.holder, "worker-2");
}

#[tokio::test]
async fn test_lock_visible_across_connections() {
    let temp_dir = create_test_dir();
    let first = open_in(&temp_dir).await;
    let second = open_in(&temp_dir).await;

    first.acquire_lock("demo", "first", 60).await.unwrap();
    assert!(matches!(
        second.acquire_lock("demo", "second", 60).await,
        Err(Error::LockConflict { .. })
    ));

    first.release_lock("demo").await.unwrap();
    second.acquire_lock("demo", "second", 60).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_acquire_has_one_winner() {
    let temp_dir = create_test_dir();
    let mut backends = Vec::new();
    for _ in 0..4 {
        backends.push(Arc::new(open_in(&temp_dir).await));
    }

    let mut tasks = Vec::new();
    for (i, backend) in backends.iter().enumerate() {
        let backend = backend.clone();
        tasks.push(tokio::spawn(async move {
            backend
                .acquire_lock("race", &format!("holder-{}", i), 60)
                .await
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => winners += 1,
            Err(Error::LockConflict { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_audit_created_at_non_decreasing() {
    let temp_dir = create_test_dir();
    let backend = open_in(&temp_dir).await;

    for i in 0..25 {
        backend
            .append_audit_log("demo", &json!({ "seq": i }))
            .await
            .unwrap();
    }

    let entries = backend.get_audit_log("demo", None).await.unwrap();
    assert_eq!(entries.len(), 25);
    for pair in entries.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
        assert!(pair[0].id < pair[1].id);
    }
    assert_eq!(entries[0].entry["seq"], 0);
    assert_eq!(entries[24].entry["seq"], 24);

    let tail = backend.get_audit_log("demo", Some(3)).await.unwrap();
    assert_eq!(tail.len(), 3);
    assert_eq!(tail[0].entry["seq"], 22);
}

#[tokio::test]
async fn test_state_survives_reopen_and_lists_stacks() {
    let temp_dir = create_test_dir();
    {
        let backend = open_in(&temp_dir).await;
        backend.save_state("a", &json!({ "nodes": [] })).await.unwrap();
        backend.save_state("b", &json!({ "v": 2 })).await.unwrap();
    }

    let backend = open_in(&temp_dir).await;
    assert_eq!(
        backend.get_state("b").await.unwrap(),
        Some(json!({ "v": 2 }))
    );
    assert_eq!(backend.get_state("missing").await.unwrap(), None);

    let mut stacks = backend.list_stacks().await.unwrap();
    stacks.sort();
    assert_eq!(stacks, vec!["a".to_string(), "b".to_string()]);
}
