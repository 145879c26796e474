//! The per-message state machine:
//!
//! received → path resolved → existence checked → control checked →
//! dedup checked (message id, then path) → processed → recommit checked →
//! committed → acknowledged.
//!
//! The pre-checks narrow the duplicate window cheaply; correctness rests on
//! the store's conditional commit, never on the checks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use scriptorium_common::{FileError, FileResult, FileTask, ResultStatus};
use scriptorium_queue::{topics, Delivery, TaskQueue};
use scriptorium_store::{CommitOutcome, JobStore};

use crate::control::WorkerControl;
use crate::extract::{ExtractOptions, TextExtractor};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent in-flight extractions per worker process.
    pub max_in_flight: usize,
    /// Ceiling for one extraction call; individual calls may run for minutes.
    pub extract_timeout: Duration,
    /// Queue lease extension cadence while an extraction runs.
    pub heartbeat_interval: Duration,
    /// Total attempts before a file is committed as a terminal error.
    pub max_attempts: u32,
    /// Requeue delay is `requeue_base * 2^attempt`.
    pub requeue_base: Duration,
    /// Idle sleep when the topic is empty.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            extract_timeout: Duration::from_secs(600),
            heartbeat_interval: Duration::from_secs(30),
            max_attempts: 3,
            requeue_base: Duration::from_secs(1),
            poll_interval: Duration::from_millis(500),
        }
    }
}

enum Disposition {
    Ack,
    Requeue,
}

pub struct TaskWorker {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn TextExtractor>,
    control: Arc<WorkerControl>,
    semaphore: Arc<Semaphore>,
    config: WorkerConfig,
}

impl TaskWorker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn TextExtractor>,
        control: Arc<WorkerControl>,
        config: WorkerConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_in_flight));
        Self {
            queue,
            store,
            extractor,
            control,
            semaphore,
            config,
        }
    }

    /// Consume the task topic until the process exits.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(max_in_flight = self.config.max_in_flight, "Task worker started");
        loop {
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .context("worker semaphore closed")?;

            let Some(delivery) = self.queue.consume(topics::TASKS).await? else {
                drop(permit);
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            };

            let worker = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = worker.handle_delivery(&delivery).await {
                    warn!(error = %e, message_id = %delivery.message_id, "Handler failed, requeueing");
                    if let Err(e) = worker.queue.nack(&delivery).await {
                        warn!(error = %e, "Nack failed");
                    }
                }
            });
        }
    }

    /// Process one delivery end to end, including the ack/requeue decision.
    /// Errors escaping this function mean infrastructure trouble (store or
    /// queue unreachable), not a file failure — the caller nacks.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<()> {
        match self.process_delivery(delivery).await? {
            Disposition::Ack => self.queue.ack(delivery).await,
            Disposition::Requeue => self.queue.nack(delivery).await,
        }
    }

    async fn process_delivery(&self, delivery: &Delivery) -> Result<Disposition> {
        // Malformed messages are acked immediately: retrying a parse failure
        // cannot help, and no job state may be touched.
        let task: FileTask = match serde_json::from_slice(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, message_id = %delivery.message_id, "Malformed task message, acking");
                return Ok(Disposition::Ack);
            }
        };

        // Path resolution: absolute form so two relative spellings of the
        // same file dedupe identically.
        let resolved = match std::path::absolute(PathBuf::from(&task.file_path)) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, file_path = %task.file_path, "Unresolvable path");
                return self
                    .commit_terminal(&task, &task.file_path, delivery, &format!("unresolvable path: {e}"))
                    .await;
            }
        };

        // Existence check before paying for extraction.
        if !tokio::fs::try_exists(&resolved).await.unwrap_or(false) {
            warn!(job_id = %task.job_id, file_path = %resolved.display(), "File missing");
            let path_key = resolved.to_string_lossy().into_owned();
            return self
                .commit_terminal(&task, &path_key, delivery, "file not found")
                .await;
        }

        // Canonical form (symlinks, `..`) is the dedup key.
        let resolved = tokio::fs::canonicalize(&resolved)
            .await
            .unwrap_or(resolved);
        let path_key = resolved.to_string_lossy().into_owned();

        // Control check: paused jobs go back on the queue untouched,
        // cancelled jobs are drained without work.
        if self.control.is_cancelled(&task.job_id) {
            info!(job_id = %task.job_id, "Job cancelled, draining task");
            return Ok(Disposition::Ack);
        }
        if self.control.is_paused(&task.job_id) {
            debug!(job_id = %task.job_id, "Job paused, requeueing task");
            return Ok(Disposition::Requeue);
        }

        // Dedup pre-checks: message id first (queue redelivery), then path
        // (a different message for the same logical file).
        if self
            .store
            .check_if_message_processed(&task.job_id, &delivery.message_id)
            .await?
        {
            debug!(job_id = %task.job_id, message_id = %delivery.message_id, "Duplicate message, acking");
            return Ok(Disposition::Ack);
        }
        if self.store.check_if_processed(&task.job_id, &path_key).await? {
            debug!(job_id = %task.job_id, file_path = %path_key, "File already processed, acking");
            return Ok(Disposition::Ack);
        }

        self.store
            .update_progress(&task.job_id, resolved.file_name().and_then(|n| n.to_str()))
            .await?;

        // Extraction, with a lease heartbeat so a minutes-long call does not
        // get redelivered out from under us.
        let output = match self.extract_with_heartbeat(&task, &resolved, delivery).await {
            Ok(output) => output,
            Err(e) => return self.retry_or_fail(&task, &path_key, delivery, e).await,
        };

        // A cancel may have landed while the extraction ran; the finished
        // result is discarded, never committed.
        if self.control.is_cancelled(&task.job_id) {
            info!(job_id = %task.job_id, file_path = %path_key, "Job cancelled during extraction, discarding result");
            return Ok(Disposition::Ack);
        }

        // Recommit check: narrows the race window; the store's filter is
        // still the final arbiter.
        if self.store.check_if_processed(&task.job_id, &path_key).await? {
            debug!(job_id = %task.job_id, file_path = %path_key, "Processed while extracting, acking");
            return Ok(Disposition::Ack);
        }

        let result = FileResult {
            file_path: path_key.clone(),
            file_index: task.file_index,
            status: ResultStatus::Completed,
            extracted_text: output.text,
            confidence: output.confidence,
            metadata: output.metadata,
            retry_count: task.attempt,
            processed_at: Utc::now(),
        };

        match self
            .store
            .commit_result(&task.job_id, &path_key, result, Some(&delivery.message_id))
            .await?
        {
            CommitOutcome::Committed => {
                info!(job_id = %task.job_id, file_path = %path_key, attempt = task.attempt, "Committed extraction");
            }
            CommitOutcome::AlreadyHandled => {
                debug!(job_id = %task.job_id, file_path = %path_key, "Lost commit race, acking");
            }
        }
        Ok(Disposition::Ack)
    }

    async fn extract_with_heartbeat(
        &self,
        task: &FileTask,
        path: &std::path::Path,
        delivery: &Delivery,
    ) -> Result<crate::extract::ExtractionOutput> {
        let queue = Arc::clone(&self.queue);
        let heartbeat_delivery = delivery.clone();
        let interval = self.config.heartbeat_interval;
        let heartbeat = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = queue.extend_lease(&heartbeat_delivery).await {
                    warn!(error = %e, "Lease heartbeat failed");
                }
            }
        });

        let options = ExtractOptions {
            mode: task.processing_mode,
            languages: task.languages.clone(),
            handwriting: task.handwriting,
        };
        let outcome = tokio::time::timeout(
            self.config.extract_timeout,
            self.extractor.extract(path, &options),
        )
        .await;
        heartbeat.abort();

        match outcome {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "extraction timed out after {:?}",
                self.config.extract_timeout
            )),
        }
    }

    /// Failure boundary: requeue with exponential delay while attempts
    /// remain, otherwise commit a terminal FileError. At this layer the only
    /// classification is retryable-attempt-N vs exhausted.
    async fn retry_or_fail(
        &self,
        task: &FileTask,
        path_key: &str,
        delivery: &Delivery,
        error: anyhow::Error,
    ) -> Result<Disposition> {
        if task.attempt + 1 < self.config.max_attempts {
            let mut retry = task.clone();
            retry.attempt += 1;
            let delay = self.config.requeue_base * 2u32.saturating_pow(task.attempt);
            warn!(
                job_id = %task.job_id,
                file_path = %path_key,
                attempt = task.attempt,
                delay_secs = delay.as_secs(),
                error = %error,
                "Extraction failed, scheduling retry"
            );
            let body = serde_json::to_vec(&retry).context("encode retry task")?;
            self.queue
                .publish_delayed(topics::TASKS, body, delay)
                .await?;
            return Ok(Disposition::Ack);
        }

        warn!(
            job_id = %task.job_id,
            file_path = %path_key,
            attempts = self.config.max_attempts,
            error = %error,
            "Attempts exhausted, committing terminal error"
        );
        self.commit_terminal(task, path_key, delivery, &error.to_string())
            .await
    }

    async fn commit_terminal(
        &self,
        task: &FileTask,
        path_key: &str,
        delivery: &Delivery,
        message: &str,
    ) -> Result<Disposition> {
        let error = FileError {
            file_path: path_key.to_string(),
            error_message: message.to_string(),
            processed_at: Utc::now(),
        };
        self.store
            .commit_error(&task.job_id, path_key, error, Some(&delivery.message_id))
            .await?;
        Ok(Disposition::Ack)
    }
}
