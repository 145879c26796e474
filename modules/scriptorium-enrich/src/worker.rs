//! Queue consumer around the orchestrator.
//!
//! One document at a time: a single enrichment run fans out enough tool calls
//! on its own, so the worker does not add a second layer of concurrency. Each
//! run executes on its own spawned task under a wall-clock ceiling, so a hung
//! pipeline cannot wedge the consume loop, and a panic inside the pipeline is
//! contained to that task.
//!
//! Exactly-once effects use the same conditional commit as extraction, with
//! the document id as the dedup key and the enrichment job as the job row.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use scriptorium_common::{EnrichmentTask, FileResult, Job, ResultStatus};
use scriptorium_queue::{topics, Delivery, TaskQueue};
use scriptorium_store::{CommitOutcome, DocumentStore, JobStore, ReviewEntry};

use crate::orchestrator::{AgentOrchestrator, EnrichmentOutcome};

#[derive(Debug, Clone)]
pub struct EnrichmentWorkerConfig {
    /// Wall-clock ceiling for one full pipeline run, all phases and retries
    /// included. Per-tool timeouts bound individual calls; this bounds the sum.
    pub run_ceiling: Duration,
    /// Idle sleep when the topic is empty.
    pub poll_interval: Duration,
}

impl Default for EnrichmentWorkerConfig {
    fn default() -> Self {
        Self {
            run_ceiling: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
        }
    }
}

enum Disposition {
    Ack,
    Requeue,
}

pub struct EnrichmentWorker {
    queue: Arc<dyn TaskQueue>,
    jobs: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentStore>,
    orchestrator: Arc<AgentOrchestrator>,
    config: EnrichmentWorkerConfig,
}

impl EnrichmentWorker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        jobs: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentStore>,
        orchestrator: Arc<AgentOrchestrator>,
        config: EnrichmentWorkerConfig,
    ) -> Self {
        Self {
            queue,
            jobs,
            documents,
            orchestrator,
            config,
        }
    }

    /// Consume the enrichment topic until the process exits.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(ceiling_secs = self.config.run_ceiling.as_secs(), "Enrichment worker started");
        loop {
            let Some(delivery) = self.queue.consume(topics::ENRICHMENT).await? else {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            };
            if let Err(e) = self.handle_delivery(&delivery).await {
                warn!(error = %e, message_id = %delivery.message_id, "Handler failed, requeueing");
                if let Err(e) = self.queue.nack(&delivery).await {
                    warn!(error = %e, "Nack failed");
                }
            }
        }
    }

    /// Process one delivery end to end, including the ack/requeue decision.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<()> {
        match self.process_delivery(delivery).await? {
            Disposition::Ack => self.queue.ack(delivery).await,
            Disposition::Requeue => self.queue.nack(delivery).await,
        }
    }

    async fn process_delivery(&self, delivery: &Delivery) -> Result<Disposition> {
        // Malformed messages are acked: redelivery cannot fix a parse failure.
        let task: EnrichmentTask = match serde_json::from_slice(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, message_id = %delivery.message_id, "Malformed enrichment message, acking");
                return Ok(Disposition::Ack);
            }
        };
        if task.document_id.is_empty() || task.enrichment_job_id.is_empty() {
            warn!(task_id = %task.task_id, "Enrichment message missing ids, acking");
            return Ok(Disposition::Ack);
        }

        // Dedup pre-checks: message id (queue redelivery), then document id
        // (a different message for the same document).
        if self
            .jobs
            .check_if_message_processed(&task.enrichment_job_id, &delivery.message_id)
            .await?
        {
            debug!(job_id = %task.enrichment_job_id, message_id = %delivery.message_id, "Duplicate message, acking");
            return Ok(Disposition::Ack);
        }
        if self
            .jobs
            .check_if_processed(&task.enrichment_job_id, &task.document_id)
            .await?
        {
            debug!(job_id = %task.enrichment_job_id, document_id = %task.document_id, "Document already enriched, acking");
            return Ok(Disposition::Ack);
        }

        // The enrichment job row is created lazily by whichever document of
        // the batch arrives first. The batch size from the message becomes
        // the published count up front, so the aggregation sweep only closes
        // the job once every document has been consumed.
        if self.jobs.get(&task.enrichment_job_id).await?.is_none() {
            let mut job = Job::new(&task.enrichment_job_id, task.batch_size);
            job.published_count = task.batch_size;
            // A concurrent create is fine: the loser's error is ignored and
            // the winner's row is used.
            let _ = self.jobs.create(&job).await;
        }

        let outcome = match self.run_isolated(&task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    job_id = %task.enrichment_job_id,
                    document_id = %task.document_id,
                    error = %e,
                    "Enrichment run failed, requeueing"
                );
                return Ok(Disposition::Requeue);
            }
        };

        self.documents.upsert(&outcome.document).await?;
        if !outcome.report.passes_threshold {
            self.documents
                .insert_review(&ReviewEntry {
                    document_id: task.document_id.clone(),
                    enrichment_job_id: task.enrichment_job_id.clone(),
                    completeness_score: outcome.report.completeness_score,
                    missing_fields: outcome.report.missing_fields.clone(),
                    low_confidence_fields: outcome.report.low_confidence_fields.clone(),
                    created_at: Utc::now(),
                })
                .await?;
            info!(
                document_id = %task.document_id,
                completeness = outcome.report.completeness_score,
                "Document routed to human review"
            );
        }

        let result = FileResult {
            file_path: task.document_id.clone(),
            file_index: 0,
            status: ResultStatus::Completed,
            extracted_text: String::new(),
            confidence: outcome.report.completeness_score,
            metadata: json!({
                "review_status": outcome.document.review_status,
                "phase3_skipped": outcome.document.enriched_data.phase3_skipped,
            }),
            retry_count: 0,
            processed_at: Utc::now(),
        };
        match self
            .jobs
            .commit_result(
                &task.enrichment_job_id,
                &task.document_id,
                result,
                Some(&delivery.message_id),
            )
            .await?
        {
            CommitOutcome::Committed => {
                info!(
                    job_id = %task.enrichment_job_id,
                    document_id = %task.document_id,
                    "Committed enrichment"
                );
            }
            CommitOutcome::AlreadyHandled => {
                debug!(
                    job_id = %task.enrichment_job_id,
                    document_id = %task.document_id,
                    "Lost commit race, acking"
                );
            }
        }
        Ok(Disposition::Ack)
    }

    /// Run the pipeline on its own task under the wall-clock ceiling.
    async fn run_isolated(&self, task: &EnrichmentTask) -> Result<EnrichmentOutcome> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let task = task.clone();
        let mut handle = tokio::spawn(async move { orchestrator.enrich(&task).await });

        match tokio::time::timeout(self.config.run_ceiling, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(anyhow::anyhow!("enrichment task panicked: {join_err}")),
            Err(_) => {
                handle.abort();
                Err(anyhow::anyhow!(
                    "enrichment run exceeded ceiling of {:?}",
                    self.config.run_ceiling
                ))
            }
        }
    }
}
