//! Task worker state-machine tests against the in-memory queue and store:
//! no network, no database, no Docker.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use scriptorium_common::{
    ControlAction, ControlMessage, FileTask, Job, ProcessingMode,
};
use scriptorium_queue::{topics, MemoryQueue, TaskQueue};
use scriptorium_store::{JobStore, MemoryJobStore};
use scriptorium_worker::{
    ExtractOptions, ExtractionOutput, TaskWorker, TextExtractor, WorkerConfig, WorkerControl,
};

struct StubExtractor {
    calls: AtomicU32,
    /// Fail this many calls before succeeding; u32::MAX fails forever.
    fail_first: u32,
}

impl StubExtractor {
    fn succeeding() -> Self {
        Self { calls: AtomicU32::new(0), fail_first: 0 }
    }

    fn always_failing() -> Self {
        Self { calls: AtomicU32::new(0), fail_first: u32::MAX }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract(&self, _path: &Path, _options: &ExtractOptions) -> Result<ExtractionOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(anyhow!("backend unavailable"));
        }
        Ok(ExtractionOutput {
            text: "My dearest Eleanor, the harvest is in.".to_string(),
            confidence: 0.91,
            metadata: serde_json::json!({"provider": "stub"}),
        })
    }
}

/// Extractor that signals when a call starts and blocks until released, so a
/// test can change control state while an extraction is in flight.
struct GatedExtractor {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl TextExtractor for GatedExtractor {
    async fn extract(&self, _path: &Path, _options: &ExtractOptions) -> Result<ExtractionOutput> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(ExtractionOutput {
            text: "My dearest Eleanor, the harvest is in.".to_string(),
            confidence: 0.91,
            metadata: serde_json::json!({"provider": "gated"}),
        })
    }
}

struct Harness {
    queue: Arc<MemoryQueue>,
    store: Arc<MemoryJobStore>,
    control: Arc<WorkerControl>,
    worker: TaskWorker,
    extractor: Arc<StubExtractor>,
}

fn harness(extractor: StubExtractor) -> Harness {
    let queue = Arc::new(MemoryQueue::new());
    let store = Arc::new(MemoryJobStore::new());
    let control = Arc::new(WorkerControl::new());
    let extractor = Arc::new(extractor);
    let worker = TaskWorker::new(
        Arc::clone(&queue) as Arc<dyn TaskQueue>,
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&extractor) as Arc<dyn TextExtractor>,
        Arc::clone(&control),
        WorkerConfig {
            requeue_base: Duration::ZERO,
            ..WorkerConfig::default()
        },
    );
    Harness { queue, store, control, worker, extractor }
}

fn task_for(job_id: &str, file_path: &str) -> FileTask {
    FileTask {
        job_id: job_id.to_string(),
        file_path: file_path.to_string(),
        file_index: 0,
        processing_mode: ProcessingMode::Standard,
        languages: vec!["en".to_string()],
        handwriting: false,
        attempt: 0,
    }
}

async fn publish_task(queue: &MemoryQueue, task: &FileTask) {
    queue
        .publish(topics::TASKS, serde_json::to_vec(task).unwrap())
        .await
        .unwrap();
}

fn scratch_file(name: &str, contents: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(name), contents).unwrap();
    dir
}

#[tokio::test]
async fn successful_extraction_commits_and_acks() {
    let h = harness(StubExtractor::succeeding());
    h.store.create(&Job::new("job-1", 1)).await.unwrap();

    let dir = scratch_file("letter.txt", "Dear Margaret");
    let path = dir.path().join("letter.txt");
    publish_task(&h.queue, &task_for("job-1", path.to_str().unwrap())).await;

    let delivery = h.queue.consume(topics::TASKS).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();

    let job = h.store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 1);
    assert_eq!(job.checkpoint.results.len(), 1);
    assert_eq!(job.progress.percentage, 100.0);
    assert_eq!(h.queue.depth(topics::TASKS), 0);
    assert_eq!(h.queue.in_flight(), 0);
}

#[tokio::test]
async fn three_failures_produce_one_terminal_error_and_no_fourth_attempt() {
    let h = harness(StubExtractor::always_failing());
    h.store.create(&Job::new("job-1", 1)).await.unwrap();

    let dir = scratch_file("smudged.txt", "illegible");
    let path = dir.path().join("smudged.txt");
    publish_task(&h.queue, &task_for("job-1", path.to_str().unwrap())).await;

    // Drive the requeue loop until the queue drains.
    for _ in 0..5 {
        let Some(delivery) = h.queue.consume(topics::TASKS).await.unwrap() else {
            break;
        };
        h.worker.handle_delivery(&delivery).await.unwrap();
    }

    assert_eq!(h.extractor.calls(), 3);
    assert_eq!(h.queue.depth(topics::TASKS), 0);

    let job = h.store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.checkpoint.errors.len(), 1);
    assert_eq!(job.consumed_count, 1);
    assert_eq!(job.checkpoint.consecutive_errors, 1);
}

#[tokio::test]
async fn malformed_message_is_acked_without_touching_state() {
    let h = harness(StubExtractor::succeeding());
    h.store.create(&Job::new("job-1", 1)).await.unwrap();

    h.queue
        .publish(topics::TASKS, b"{not json".to_vec())
        .await
        .unwrap();
    let delivery = h.queue.consume(topics::TASKS).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();

    assert_eq!(h.queue.depth(topics::TASKS), 0);
    assert_eq!(h.queue.in_flight(), 0);
    let job = h.store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 0);
    assert!(job.checkpoint.errors.is_empty());
}

#[tokio::test]
async fn redelivered_message_after_commit_is_acked_without_reprocessing() {
    let h = harness(StubExtractor::succeeding());
    h.store.create(&Job::new("job-1", 1)).await.unwrap();

    let dir = scratch_file("letter.txt", "Dear Margaret");
    let path = dir.path().join("letter.txt");
    publish_task(&h.queue, &task_for("job-1", path.to_str().unwrap())).await;

    let delivery = h.queue.consume(topics::TASKS).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();
    assert_eq!(h.extractor.calls(), 1);

    // The broker redelivers the same message (ack lost in transit).
    h.worker.handle_delivery(&delivery).await.unwrap();

    assert_eq!(h.extractor.calls(), 1);
    let job = h.store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 1);
}

#[tokio::test]
async fn paused_job_requeues_untouched_and_resumes() {
    let h = harness(StubExtractor::succeeding());
    h.store.create(&Job::new("job-1", 1)).await.unwrap();
    h.control.apply(&ControlMessage {
        job_id: "job-1".to_string(),
        action: ControlAction::Pause,
    });

    let dir = scratch_file("letter.txt", "Dear Margaret");
    let path = dir.path().join("letter.txt");
    publish_task(&h.queue, &task_for("job-1", path.to_str().unwrap())).await;

    let delivery = h.queue.consume(topics::TASKS).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();

    assert_eq!(h.extractor.calls(), 0);
    assert_eq!(h.queue.depth(topics::TASKS), 1);

    h.control.apply(&ControlMessage {
        job_id: "job-1".to_string(),
        action: ControlAction::Resume,
    });
    let delivery = h.queue.consume(topics::TASKS).await.unwrap().unwrap();
    assert!(delivery.redelivered);
    h.worker.handle_delivery(&delivery).await.unwrap();

    let job = h.store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 1);
}

#[tokio::test]
async fn cancelled_job_drains_messages_without_processing() {
    let h = harness(StubExtractor::succeeding());
    h.store.create(&Job::new("job-1", 1)).await.unwrap();
    h.control.apply(&ControlMessage {
        job_id: "job-1".to_string(),
        action: ControlAction::Cancel,
    });

    let dir = scratch_file("letter.txt", "Dear Margaret");
    let path = dir.path().join("letter.txt");
    publish_task(&h.queue, &task_for("job-1", path.to_str().unwrap())).await;

    let delivery = h.queue.consume(topics::TASKS).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();

    assert_eq!(h.extractor.calls(), 0);
    assert_eq!(h.queue.depth(topics::TASKS), 0);
    let job = h.store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 0);
}

#[tokio::test]
async fn cancel_during_extraction_discards_the_finished_result() {
    let queue = Arc::new(MemoryQueue::new());
    let store = Arc::new(MemoryJobStore::new());
    let control = Arc::new(WorkerControl::new());
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let worker = Arc::new(TaskWorker::new(
        Arc::clone(&queue) as Arc<dyn TaskQueue>,
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::new(GatedExtractor {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        }),
        Arc::clone(&control),
        WorkerConfig {
            requeue_base: Duration::ZERO,
            ..WorkerConfig::default()
        },
    ));
    store.create(&Job::new("job-1", 1)).await.unwrap();

    let dir = scratch_file("letter.txt", "Dear Margaret");
    let path = dir.path().join("letter.txt");
    publish_task(&queue, &task_for("job-1", path.to_str().unwrap())).await;

    let delivery = queue.consume(topics::TASKS).await.unwrap().unwrap();
    let handle = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.handle_delivery(&delivery).await })
    };

    // Cancel lands while the extraction is in flight.
    started.notified().await;
    control.apply(&ControlMessage {
        job_id: "job-1".to_string(),
        action: ControlAction::Cancel,
    });
    release.notify_one();
    handle.await.unwrap().unwrap();

    let job = store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 0);
    assert!(job.checkpoint.results.is_empty());
    assert_eq!(queue.depth(topics::TASKS), 0);
    assert_eq!(queue.in_flight(), 0);
}

#[tokio::test]
async fn missing_file_is_a_terminal_error() {
    let h = harness(StubExtractor::succeeding());
    h.store.create(&Job::new("job-1", 1)).await.unwrap();

    publish_task(&h.queue, &task_for("job-1", "/nonexistent/scan_042.png")).await;
    let delivery = h.queue.consume(topics::TASKS).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();

    assert_eq!(h.extractor.calls(), 0);
    let job = h.store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.checkpoint.errors.len(), 1);
    assert!(job.checkpoint.errors[0].error_message.contains("file not found"));
    assert_eq!(job.consumed_count, 1);
}

#[tokio::test]
async fn relative_and_absolute_spellings_dedupe_identically() {
    let h = harness(StubExtractor::succeeding());
    h.store.create(&Job::new("job-1", 2)).await.unwrap();

    let dir = scratch_file("letter.txt", "Dear Margaret");
    let abs = dir.path().join("letter.txt");
    let dotted = dir.path().join(".").join("letter.txt");

    publish_task(&h.queue, &task_for("job-1", abs.to_str().unwrap())).await;
    publish_task(&h.queue, &task_for("job-1", dotted.to_str().unwrap())).await;

    while let Some(delivery) = h.queue.consume(topics::TASKS).await.unwrap() {
        h.worker.handle_delivery(&delivery).await.unwrap();
    }

    let job = h.store.get("job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 1);
    assert_eq!(job.checkpoint.results.len(), 1);
}
