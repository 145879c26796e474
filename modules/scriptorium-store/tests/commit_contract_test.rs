//! Conditional-commit contract tests, run against the in-memory store (the
//! Postgres implementation enforces the identical filter in one UPDATE).

use std::sync::Arc;

use chrono::Utc;
use scriptorium_common::{FileError, FileResult, Job, JobStatus, ResultStatus};
use scriptorium_store::{CommitOutcome, JobStore, MemoryJobStore};

fn result_for(path: &str, index: u32) -> FileResult {
    FileResult {
        file_path: path.to_string(),
        file_index: index,
        status: ResultStatus::Completed,
        extracted_text: "Dear Margaret, ...".to_string(),
        confidence: 0.93,
        metadata: serde_json::json!({"provider": "vision"}),
        retry_count: 0,
        processed_at: Utc::now(),
    }
}

fn error_for(path: &str) -> FileError {
    FileError {
        file_path: path.to_string(),
        error_message: "extraction failed after 3 attempts".to_string(),
        processed_at: Utc::now(),
    }
}

#[tokio::test]
async fn racing_commits_on_one_file_produce_exactly_one_winner() {
    let store = Arc::new(MemoryJobStore::new());
    store.create(&Job::new("job-1", 10)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .commit_result("job-1", "/scans/letter_001.png", result_for("/scans/letter_001.png", 0), Some(&format!("msg-{i}")))
                .await
                .unwrap()
        }));
    }

    let mut committed = 0;
    for handle in handles {
        if handle.await.unwrap() == CommitOutcome::Committed {
            committed += 1;
        }
    }
    assert_eq!(committed, 1);

    let job = store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 1);
    assert_eq!(job.checkpoint.results.len(), 1);
}

#[tokio::test]
async fn redelivered_message_id_is_rejected_without_double_count() {
    let store = MemoryJobStore::new();
    store.create(&Job::new("job-1", 2)).await.unwrap();

    let first = store
        .commit_result("job-1", "/scans/a.png", result_for("/scans/a.png", 0), Some("msg-1"))
        .await
        .unwrap();
    assert_eq!(first, CommitOutcome::Committed);

    // Queue redelivers msg-1 targeting a different spelling of the same work.
    let replay = store
        .commit_result("job-1", "/scans/a_copy.png", result_for("/scans/a_copy.png", 0), Some("msg-1"))
        .await
        .unwrap();
    assert_eq!(replay, CommitOutcome::AlreadyHandled);

    let job = store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 1);
    assert_eq!(job.checkpoint.results.len(), 1);
}

#[tokio::test]
async fn errors_count_toward_consumption_and_job_converges() {
    let store = MemoryJobStore::new();
    store.create(&Job::new("job-1", 3)).await.unwrap();
    store.increment_published("job-1", 3).await.unwrap();

    store
        .commit_result("job-1", "/scans/a.png", result_for("/scans/a.png", 0), Some("m1"))
        .await
        .unwrap();
    store
        .commit_error("job-1", "/scans/b.png", error_for("/scans/b.png"), Some("m2"))
        .await
        .unwrap();

    // Not ready yet: one task outstanding.
    assert!(store.find_ready_for_aggregation().await.unwrap().is_empty());

    store
        .commit_result("job-1", "/scans/c.png", result_for("/scans/c.png", 2), Some("m3"))
        .await
        .unwrap();

    let ready = store.find_ready_for_aggregation().await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].consumed_count, 3);
    assert_eq!(ready[0].progress.percentage, 100.0);
    assert_eq!(ready[0].checkpoint.errors.len(), 1);

    // Aggregator picks it up once; afterwards the scan no longer returns it.
    store.mark_completed("job-1").await.unwrap();
    assert!(store.find_ready_for_aggregation().await.unwrap().is_empty());

    let job = store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn same_path_via_different_messages_commits_once() {
    let store = MemoryJobStore::new();
    store.create(&Job::new("job-1", 5)).await.unwrap();

    let first = store
        .commit_result("job-1", "/scans/dup.png", result_for("/scans/dup.png", 1), Some("m1"))
        .await
        .unwrap();
    let second = store
        .commit_result("job-1", "/scans/dup.png", result_for("/scans/dup.png", 1), Some("m2"))
        .await
        .unwrap();

    assert_eq!(first, CommitOutcome::Committed);
    assert_eq!(second, CommitOutcome::AlreadyHandled);
}

#[tokio::test]
async fn unknown_total_keeps_percentage_at_zero() {
    // Jobs created with total_files = 0 (batch size not yet known) must not
    // report runaway progress as commits land.
    let store = MemoryJobStore::new();
    store.create(&Job::new("job-1", 0)).await.unwrap();

    store
        .commit_result("job-1", "/scans/a.png", result_for("/scans/a.png", 0), Some("m1"))
        .await
        .unwrap();
    store
        .commit_result("job-1", "/scans/b.png", result_for("/scans/b.png", 1), Some("m2"))
        .await
        .unwrap();

    let job = store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 2);
    assert_eq!(job.progress.percentage, 0.0);
}

#[tokio::test]
async fn create_rejects_duplicate_job_id() {
    let store = MemoryJobStore::new();
    store.create(&Job::new("job-1", 1)).await.unwrap();
    assert!(store.create(&Job::new("job-1", 1)).await.is_err());
}
