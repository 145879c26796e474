//! Enrichment worker behavior over the in-memory queue and stores: no
//! network, no database, no Docker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use scriptorium_common::{EnrichmentTask, ReviewStatus};
use scriptorium_enrich::{
    AgentOrchestrator, EnrichmentWorker, EnrichmentWorkerConfig, FieldValidator,
    OrchestratorConfig, PeriodBudget, ToolError, ToolInvoker,
};
use scriptorium_queue::{topics, MemoryQueue, TaskQueue};
use scriptorium_store::{DocumentStore, JobStore, MemoryDocumentStore, MemoryJobStore};

/// Invoker that answers every tool from one response table and counts calls.
struct TableInvoker {
    responses: HashMap<String, Value>,
    calls: AtomicU32,
    /// When set, every call sleeps this long before answering.
    stall: Option<Duration>,
}

impl TableInvoker {
    fn new(responses: HashMap<String, Value>) -> Self {
        Self {
            responses,
            calls: AtomicU32::new(0),
            stall: None,
        }
    }

    fn stalling(stall: Duration) -> Self {
        Self {
            responses: HashMap::new(),
            calls: AtomicU32::new(0),
            stall: Some(stall),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ToolInvoker for TableInvoker {
    async fn invoke(
        &self,
        _agent_id: &str,
        tool: &str,
        _args: &Value,
        _timeout: Duration,
    ) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        Ok(self.responses.get(tool).cloned().unwrap_or_else(|| json!({})))
    }
}

fn full_responses() -> HashMap<String, Value> {
    HashMap::from([
        (
            "extract_metadata".to_string(),
            json!({
                "title": "Letter to Margaret",
                "date": "1969-09-29",
                "correspondent": "H. Whitfield",
            }),
        ),
        (
            "classify_document".to_string(),
            json!({ "doc_type": "personal_letter" }),
        ),
        (
            "summarize_content".to_string(),
            json!({ "summary": "A letter about the harvest." }),
        ),
        (
            "build_biographical_context".to_string(),
            json!({ "biographical_context": "Whitfield farmed near Ames." }),
        ),
        (
            "assess_historical_significance".to_string(),
            json!({ "historical_significance": "Documents rural electrification." }),
        ),
    ])
}

struct Harness {
    queue: Arc<MemoryQueue>,
    jobs: Arc<MemoryJobStore>,
    documents: Arc<MemoryDocumentStore>,
    invoker: Arc<TableInvoker>,
    worker: EnrichmentWorker,
}

fn harness(invoker: TableInvoker, config: EnrichmentWorkerConfig) -> Harness {
    let queue = Arc::new(MemoryQueue::new());
    let jobs = Arc::new(MemoryJobStore::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let invoker = Arc::new(invoker);

    let orchestrator = Arc::new(AgentOrchestrator::new(
        Arc::clone(&invoker) as Arc<dyn ToolInvoker>,
        Arc::new(PeriodBudget::new(10_000, Duration::from_secs(3600))),
        Arc::new(FieldValidator::new(0.8)),
        OrchestratorConfig::builder().backoff_scale(0.0).build(),
    ));
    let worker = EnrichmentWorker::new(
        Arc::clone(&queue) as Arc<dyn TaskQueue>,
        Arc::clone(&jobs) as Arc<dyn JobStore>,
        Arc::clone(&documents) as Arc<dyn DocumentStore>,
        orchestrator,
        config,
    );

    Harness {
        queue,
        jobs,
        documents,
        invoker,
        worker,
    }
}

fn task(document_id: &str) -> EnrichmentTask {
    batch_task(document_id, 1)
}

fn batch_task(document_id: &str, batch_size: u32) -> EnrichmentTask {
    EnrichmentTask {
        task_id: format!("task-{document_id}"),
        enrichment_job_id: "enrich-job-1".to_string(),
        document_id: document_id.to_string(),
        batch_size,
        ocr_data: json!({ "text": "Dear Margaret, the harvest came in early this year." }),
        collection_metadata: None,
    }
}

async fn publish(queue: &MemoryQueue, task: &EnrichmentTask) {
    queue
        .publish(topics::ENRICHMENT, serde_json::to_vec(task).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn complete_document_is_stored_approved_and_committed() {
    let h = harness(
        TableInvoker::new(full_responses()),
        EnrichmentWorkerConfig::default(),
    );
    publish(&h.queue, &task("doc-1")).await;

    let delivery = h.queue.consume(topics::ENRICHMENT).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();

    let doc = h.documents.get("doc-1").await.unwrap().unwrap();
    assert_eq!(doc.review_status, ReviewStatus::Approved);
    assert!(h.documents.list_reviews().await.unwrap().is_empty());

    let job = h.jobs.get("enrich-job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 1);
    assert_eq!(job.published_count, 1);
    assert_eq!(h.queue.in_flight(), 0);
}

#[tokio::test]
async fn multi_document_batch_aggregates_only_when_fully_consumed() {
    let h = harness(
        TableInvoker::new(full_responses()),
        EnrichmentWorkerConfig::default(),
    );
    publish(&h.queue, &batch_task("doc-a", 2)).await;
    publish(&h.queue, &batch_task("doc-b", 2)).await;

    let first = h.queue.consume(topics::ENRICHMENT).await.unwrap().unwrap();
    h.worker.handle_delivery(&first).await.unwrap();

    // One of two documents consumed: the job must not look finished.
    let job = h.jobs.get("enrich-job-1").await.unwrap().unwrap();
    assert_eq!(job.published_count, 2);
    assert_eq!(job.consumed_count, 1);
    assert!(h.jobs.find_ready_for_aggregation().await.unwrap().is_empty());

    let second = h.queue.consume(topics::ENRICHMENT).await.unwrap().unwrap();
    h.worker.handle_delivery(&second).await.unwrap();

    let ready = h.jobs.find_ready_for_aggregation().await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].consumed_count, 2);
}

#[tokio::test]
async fn unknown_batch_size_never_auto_aggregates() {
    let h = harness(
        TableInvoker::new(full_responses()),
        EnrichmentWorkerConfig::default(),
    );
    publish(&h.queue, &batch_task("doc-x", 0)).await;

    let delivery = h.queue.consume(topics::ENRICHMENT).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();

    let job = h.jobs.get("enrich-job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 1);
    assert_eq!(job.published_count, 0);
    assert!(h.jobs.find_ready_for_aggregation().await.unwrap().is_empty());
}

#[tokio::test]
async fn incomplete_document_is_routed_to_review() {
    // Empty responses: only content.text is present.
    let h = harness(
        TableInvoker::new(HashMap::new()),
        EnrichmentWorkerConfig::default(),
    );
    publish(&h.queue, &task("doc-2")).await;

    let delivery = h.queue.consume(topics::ENRICHMENT).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();

    let doc = h.documents.get("doc-2").await.unwrap().unwrap();
    assert_eq!(doc.review_status, ReviewStatus::Pending);

    let reviews = h.documents.list_reviews().await.unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].document_id, "doc-2");
    assert!(reviews[0].completeness_score < 0.8);
    assert!(reviews[0]
        .missing_fields
        .contains(&"metadata.title".to_string()));
}

#[tokio::test]
async fn malformed_message_is_acked_without_touching_state() {
    let h = harness(
        TableInvoker::new(full_responses()),
        EnrichmentWorkerConfig::default(),
    );
    h.queue
        .publish(topics::ENRICHMENT, b"not json".to_vec())
        .await
        .unwrap();

    let delivery = h.queue.consume(topics::ENRICHMENT).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();

    assert_eq!(h.invoker.calls(), 0);
    assert!(h.jobs.get("enrich-job-1").await.unwrap().is_none());
    assert_eq!(h.queue.depth(topics::ENRICHMENT), 0);
    assert_eq!(h.queue.in_flight(), 0);
}

#[tokio::test]
async fn duplicate_task_for_an_enriched_document_is_drained() {
    let h = harness(
        TableInvoker::new(full_responses()),
        EnrichmentWorkerConfig::default(),
    );
    publish(&h.queue, &task("doc-3")).await;
    let first = h.queue.consume(topics::ENRICHMENT).await.unwrap().unwrap();
    h.worker.handle_delivery(&first).await.unwrap();
    let calls_after_first = h.invoker.calls();

    // A second message for the same document (producer retry).
    publish(&h.queue, &task("doc-3")).await;
    let second = h.queue.consume(topics::ENRICHMENT).await.unwrap().unwrap();
    h.worker.handle_delivery(&second).await.unwrap();

    assert_eq!(h.invoker.calls(), calls_after_first);
    let job = h.jobs.get("enrich-job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 1);
    assert_eq!(h.queue.in_flight(), 0);
}

#[tokio::test]
async fn run_over_the_ceiling_is_requeued() {
    let h = harness(
        TableInvoker::stalling(Duration::from_secs(3600)),
        EnrichmentWorkerConfig {
            run_ceiling: Duration::from_millis(50),
            ..EnrichmentWorkerConfig::default()
        },
    );
    publish(&h.queue, &task("doc-4")).await;

    let delivery = h.queue.consume(topics::ENRICHMENT).await.unwrap().unwrap();
    h.worker.handle_delivery(&delivery).await.unwrap();

    // Nacked back for redelivery, nothing persisted.
    assert_eq!(h.queue.depth(topics::ENRICHMENT), 1);
    assert!(h.documents.get("doc-4").await.unwrap().is_none());
    let job = h.jobs.get("enrich-job-1").await.unwrap().unwrap();
    assert_eq!(job.consumed_count, 0);
}
