//! In-memory stores honoring the same conditional-commit contract as the
//! Postgres implementations. The whole commit happens under one lock, which
//! is exactly the atomicity the SQL update provides.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use scriptorium_common::{
    EnrichedDocument, FileError, FileResult, Job, JobProgress, JobStatus, ScriptoriumError,
};

use crate::document_store::{DocumentStore, ReviewEntry};
use crate::job_store::{CommitOutcome, JobStore};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job<T>(&self, job_id: &str, f: impl FnOnce(&mut Job) -> T) -> Result<T> {
        let mut jobs = self.jobs.lock().expect("job store lock");
        let Some(job) = jobs.get_mut(job_id) else {
            return Err(ScriptoriumError::JobNotFound(job_id.to_string()).into());
        };
        let out = f(job);
        job.updated_at = Utc::now();
        Ok(out)
    }

    /// The shared commit body: filter on the processed sets, then mutate
    /// everything together. Runs under the store lock.
    fn commit(
        &self,
        job_id: &str,
        file_path: &str,
        message_id: Option<&str>,
        apply: impl FnOnce(&mut Job),
    ) -> Result<CommitOutcome> {
        self.with_job(job_id, |job| {
            if job.checkpoint.processed_file_paths.contains(file_path) {
                return CommitOutcome::AlreadyHandled;
            }
            if let Some(id) = message_id {
                if job.checkpoint.processed_message_ids.contains(id) {
                    return CommitOutcome::AlreadyHandled;
                }
                job.checkpoint.processed_message_ids.insert(id.to_string());
            }
            job.checkpoint
                .processed_file_paths
                .insert(file_path.to_string());
            job.checkpoint.processed_count += 1;
            job.consumed_count += 1;
            job.progress.current = job.consumed_count;
            job.progress.percentage =
                JobProgress::percentage_of(job.consumed_count, job.total_files);
            apply(job);
            CommitOutcome::Committed
        })
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("job store lock");
        if jobs.contains_key(&job.job_id) {
            bail!("job already exists: {}", job.job_id);
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.lock().expect("job store lock");
        Ok(jobs.get(job_id).cloned())
    }

    async fn check_if_processed(&self, job_id: &str, file_path: &str) -> Result<bool> {
        let jobs = self.jobs.lock().expect("job store lock");
        Ok(jobs
            .get(job_id)
            .is_some_and(|j| j.checkpoint.processed_file_paths.contains(file_path)))
    }

    async fn check_if_message_processed(&self, job_id: &str, message_id: &str) -> Result<bool> {
        let jobs = self.jobs.lock().expect("job store lock");
        Ok(jobs
            .get(job_id)
            .is_some_and(|j| j.checkpoint.processed_message_ids.contains(message_id)))
    }

    async fn commit_result(
        &self,
        job_id: &str,
        file_path: &str,
        result: FileResult,
        message_id: Option<&str>,
    ) -> Result<CommitOutcome> {
        self.commit(job_id, file_path, message_id, |job| {
            job.checkpoint
                .retry_count
                .insert(file_path.to_string(), result.retry_count);
            job.checkpoint.consecutive_errors = 0;
            job.checkpoint.results.push(result);
        })
    }

    async fn commit_error(
        &self,
        job_id: &str,
        file_path: &str,
        error: FileError,
        message_id: Option<&str>,
    ) -> Result<CommitOutcome> {
        self.commit(job_id, file_path, message_id, |job| {
            job.checkpoint.consecutive_errors += 1;
            job.checkpoint.errors.push(error);
        })
    }

    async fn increment_published(&self, job_id: &str, by: u32) -> Result<()> {
        self.with_job(job_id, |job| job.published_count += by)
    }

    async fn update_progress(&self, job_id: &str, current_filename: Option<&str>) -> Result<()> {
        self.with_job(job_id, |job| {
            job.progress.current_filename = current_filename.map(str::to_string);
        })
    }

    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        self.with_job(job_id, |job| job.status = status)
    }

    async fn mark_completed(&self, job_id: &str) -> Result<()> {
        self.with_job(job_id, |job| {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
        })
    }

    async fn mark_error(&self, job_id: &str, message: &str) -> Result<()> {
        self.with_job(job_id, |job| {
            job.status = JobStatus::Error;
            job.error_message = Some(message.to_string());
        })
    }

    async fn find_ready_for_aggregation(&self) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().expect("job store lock");
        Ok(jobs
            .values()
            .filter(|j| j.is_ready_for_aggregation())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct DocInner {
    documents: HashMap<String, EnrichedDocument>,
    reviews: Vec<ReviewEntry>,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<DocInner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, doc: &EnrichedDocument) -> Result<()> {
        let mut inner = self.inner.lock().expect("document store lock");
        inner.documents.insert(doc.document_id.clone(), doc.clone());
        Ok(())
    }

    async fn get(&self, document_id: &str) -> Result<Option<EnrichedDocument>> {
        let inner = self.inner.lock().expect("document store lock");
        Ok(inner.documents.get(document_id).cloned())
    }

    async fn insert_review(&self, entry: &ReviewEntry) -> Result<()> {
        let mut inner = self.inner.lock().expect("document store lock");
        inner.reviews.push(entry.clone());
        Ok(())
    }

    async fn list_reviews(&self) -> Result<Vec<ReviewEntry>> {
        let inner = self.inner.lock().expect("document store lock");
        Ok(inner.reviews.clone())
    }
}
