use anyhow::Result;
use async_trait::async_trait;

use scriptorium_common::{FileError, FileResult, Job, JobStatus};

/// Result of an authoritative conditional commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// This caller won: the result/error was appended and the counter bumped.
    Committed,
    /// Another caller (or an earlier delivery) already handled this file or
    /// message. Nothing was written; the caller must not double-count.
    AlreadyHandled,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails if the job id already exists.
    async fn create(&self, job: &Job) -> Result<()>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Cheap, non-authoritative pre-check: lets a worker skip obviously
    /// duplicate work before paying for extraction. Never a correctness
    /// guarantee — two workers can both pass it for the same file.
    async fn check_if_processed(&self, job_id: &str, file_path: &str) -> Result<bool>;

    /// Same, keyed by queue message id.
    async fn check_if_message_processed(&self, job_id: &str, message_id: &str) -> Result<bool>;

    /// The authoritative operation: one conditional update that appends the
    /// result, records the file path (and message id when given), increments
    /// `consumed_count`, and recomputes the progress percentage — or reports
    /// `AlreadyHandled` when the filter matched nothing.
    async fn commit_result(
        &self,
        job_id: &str,
        file_path: &str,
        result: FileResult,
        message_id: Option<&str>,
    ) -> Result<CommitOutcome>;

    /// Same contract as `commit_result`, appending to the error list instead.
    /// A terminal failure still counts as consumed.
    async fn commit_error(
        &self,
        job_id: &str,
        file_path: &str,
        error: FileError,
        message_id: Option<&str>,
    ) -> Result<CommitOutcome>;

    /// Record that `by` more tasks were published for this job.
    async fn increment_published(&self, job_id: &str, by: u32) -> Result<()>;

    /// Coarse job-level transitions; driven by a single producer/aggregator,
    /// so not subject to the commit race.
    async fn update_progress(&self, job_id: &str, current_filename: Option<&str>) -> Result<()>;
    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()>;
    async fn mark_completed(&self, job_id: &str) -> Result<()>;
    async fn mark_error(&self, job_id: &str, message: &str) -> Result<()>;

    /// Jobs where every published task has been consumed and the status is
    /// still `processing`.
    async fn find_ready_for_aggregation(&self) -> Result<Vec<Job>>;
}
