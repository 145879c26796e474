//! Postgres-backed stores.
//!
//! The conditional commit is a single `UPDATE ... WHERE NOT (already
//! processed)` whose body appends the result, records the path/message id,
//! increments `consumed_count`, and recomputes the percentage. Zero rows
//! affected means another writer committed first. Postgres's default
//! synchronous commit gives the acknowledged/durable write the contract
//! requires.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use scriptorium_common::{
    EnrichedData, EnrichedDocument, FileError, FileResult, Job, JobCheckpoint, JobProgress,
    JobStatus, QualityMetrics, ReviewStatus, ScriptoriumError,
};

use crate::document_store::{DocumentStore, ReviewEntry};
use crate::job_store::{CommitOutcome, JobStore};

/// Create the job and document schema. Safe to run on every startup.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            total_files INT NOT NULL,
            published_count INT NOT NULL DEFAULT 0,
            consumed_count INT NOT NULL DEFAULT 0,
            processed_count INT NOT NULL DEFAULT 0,
            progress_percentage DOUBLE PRECISION NOT NULL DEFAULT 0,
            current_filename TEXT,
            results JSONB NOT NULL DEFAULT '[]',
            errors JSONB NOT NULL DEFAULT '[]',
            processed_file_paths TEXT[] NOT NULL DEFAULT '{}',
            processed_message_ids TEXT[] NOT NULL DEFAULT '{}',
            retry_count JSONB NOT NULL DEFAULT '{}',
            consecutive_errors INT NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await
    .context("create jobs table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enriched_documents (
            document_id TEXT PRIMARY KEY,
            enrichment_job_id TEXT NOT NULL,
            enriched_data JSONB NOT NULL,
            quality_metrics JSONB NOT NULL,
            review_status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("create enriched_documents table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_queue (
            id BIGSERIAL PRIMARY KEY,
            document_id TEXT NOT NULL,
            enrichment_job_id TEXT NOT NULL,
            completeness_score DOUBLE PRECISION NOT NULL,
            missing_fields JSONB NOT NULL DEFAULT '[]',
            low_confidence_fields JSONB NOT NULL DEFAULT '[]',
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("create review_queue table")?;

    Ok(())
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguish "another writer won" from "no such job" after a
    /// zero-row conditional update.
    async fn outcome_for_missed_update(&self, job_id: &str) -> Result<CommitOutcome> {
        let exists = sqlx::query("SELECT 1 FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .context("check job existence")?;
        if exists.is_none() {
            return Err(ScriptoriumError::JobNotFound(job_id.to_string()).into());
        }
        Ok(CommitOutcome::AlreadyHandled)
    }
}

fn row_to_job(row: &PgRow) -> Result<Job> {
    let status_raw: String = row.try_get("status")?;
    let status = match status_raw.as_str() {
        "processing" => JobStatus::Processing,
        "paused" => JobStatus::Paused,
        "completed" => JobStatus::Completed,
        "error" => JobStatus::Error,
        other => bail!("unknown job status: {other}"),
    };

    let results: serde_json::Value = row.try_get("results")?;
    let errors: serde_json::Value = row.try_get("errors")?;
    let retry_count: serde_json::Value = row.try_get("retry_count")?;
    let paths: Vec<String> = row.try_get("processed_file_paths")?;
    let message_ids: Vec<String> = row.try_get("processed_message_ids")?;

    let total_files: i32 = row.try_get("total_files")?;
    let consumed_count: i32 = row.try_get("consumed_count")?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        status,
        total_files: total_files as u32,
        published_count: row.try_get::<i32, _>("published_count")? as u32,
        consumed_count: consumed_count as u32,
        progress: JobProgress {
            current: consumed_count as u32,
            total: total_files as u32,
            percentage: row.try_get("progress_percentage")?,
            current_filename: row.try_get("current_filename")?,
        },
        checkpoint: JobCheckpoint {
            processed_count: row.try_get::<i32, _>("processed_count")? as u32,
            results: serde_json::from_value(results).context("decode results")?,
            errors: serde_json::from_value(errors).context("decode errors")?,
            processed_file_paths: paths.into_iter().collect::<HashSet<_>>(),
            processed_message_ids: message_ids.into_iter().collect::<HashSet<_>>(),
            retry_count: serde_json::from_value::<HashMap<String, u32>>(retry_count)
                .context("decode retry_count")?,
            consecutive_errors: row.try_get::<i32, _>("consecutive_errors")? as u32,
        },
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (job_id, status, total_files, published_count,
                              consumed_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(&job.job_id)
        .bind(job.status.to_string())
        .bind(job.total_files as i32)
        .bind(job.published_count as i32)
        .bind(job.consumed_count as i32)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .context("insert job")?;

        if inserted.rows_affected() == 0 {
            bail!("job already exists: {}", job.job_id);
        }
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetch job")?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn check_if_processed(&self, job_id: &str, file_path: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM jobs
             WHERE job_id = $1 AND processed_file_paths @> ARRAY[$2::text]",
        )
        .bind(job_id)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await
        .context("check processed path")?;
        Ok(row.is_some())
    }

    async fn check_if_message_processed(&self, job_id: &str, message_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM jobs
             WHERE job_id = $1 AND processed_message_ids @> ARRAY[$2::text]",
        )
        .bind(job_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .context("check processed message")?;
        Ok(row.is_some())
    }

    async fn commit_result(
        &self,
        job_id: &str,
        file_path: &str,
        result: FileResult,
        message_id: Option<&str>,
    ) -> Result<CommitOutcome> {
        let payload = serde_json::to_value(&result).context("encode result")?;
        let retry = serde_json::json!({ file_path: result.retry_count });

        // Percentage arithmetic mirrors JobProgress::percentage_of: float
        // division, two decimals.
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET results = results || $3::jsonb,
                processed_file_paths = array_append(processed_file_paths, $2),
                processed_message_ids = CASE WHEN $4::text IS NULL
                    THEN processed_message_ids
                    ELSE array_append(processed_message_ids, $4) END,
                consumed_count = consumed_count + 1,
                processed_count = processed_count + 1,
                consecutive_errors = 0,
                retry_count = retry_count || $5::jsonb,
                progress_percentage = CASE WHEN total_files = 0 THEN 0
                    ELSE round(((consumed_count + 1) * 100.0
                        / total_files)::numeric, 2)::float8 END,
                updated_at = now()
            WHERE job_id = $1
              AND NOT (processed_file_paths @> ARRAY[$2::text])
              AND ($4::text IS NULL OR NOT (processed_message_ids @> ARRAY[$4::text]))
            "#,
        )
        .bind(job_id)
        .bind(file_path)
        .bind(payload)
        .bind(message_id)
        .bind(retry)
        .execute(&self.pool)
        .await
        .context("commit result")?;

        if updated.rows_affected() == 0 {
            return self.outcome_for_missed_update(job_id).await;
        }
        debug!(job_id, file_path, "Committed file result");
        Ok(CommitOutcome::Committed)
    }

    async fn commit_error(
        &self,
        job_id: &str,
        file_path: &str,
        error: FileError,
        message_id: Option<&str>,
    ) -> Result<CommitOutcome> {
        let payload = serde_json::to_value(&error).context("encode error")?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET errors = errors || $3::jsonb,
                processed_file_paths = array_append(processed_file_paths, $2),
                processed_message_ids = CASE WHEN $4::text IS NULL
                    THEN processed_message_ids
                    ELSE array_append(processed_message_ids, $4) END,
                consumed_count = consumed_count + 1,
                processed_count = processed_count + 1,
                consecutive_errors = consecutive_errors + 1,
                progress_percentage = CASE WHEN total_files = 0 THEN 0
                    ELSE round(((consumed_count + 1) * 100.0
                        / total_files)::numeric, 2)::float8 END,
                updated_at = now()
            WHERE job_id = $1
              AND NOT (processed_file_paths @> ARRAY[$2::text])
              AND ($4::text IS NULL OR NOT (processed_message_ids @> ARRAY[$4::text]))
            "#,
        )
        .bind(job_id)
        .bind(file_path)
        .bind(payload)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .context("commit error")?;

        if updated.rows_affected() == 0 {
            return self.outcome_for_missed_update(job_id).await;
        }
        debug!(job_id, file_path, "Committed file error");
        Ok(CommitOutcome::Committed)
    }

    async fn increment_published(&self, job_id: &str, by: u32) -> Result<()> {
        sqlx::query(
            "UPDATE jobs
             SET published_count = published_count + $2, updated_at = now()
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(by as i32)
        .execute(&self.pool)
        .await
        .context("increment published count")?;
        Ok(())
    }

    async fn update_progress(&self, job_id: &str, current_filename: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET current_filename = $2, updated_at = now() WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(current_filename)
        .execute(&self.pool)
        .await
        .context("update progress")?;
        Ok(())
    }

    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = $2, updated_at = now() WHERE job_id = $1")
            .bind(job_id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await
            .context("update status")?;
        Ok(())
    }

    async fn mark_completed(&self, job_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs
             SET status = 'completed', completed_at = now(), updated_at = now()
             WHERE job_id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("mark job completed")?;
        Ok(())
    }

    async fn mark_error(&self, job_id: &str, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs
             SET status = 'error', error_message = $2, updated_at = now()
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(message)
        .execute(&self.pool)
        .await
        .context("mark job errored")?;
        Ok(())
    }

    async fn find_ready_for_aggregation(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs
             WHERE status = 'processing'
               AND published_count > 0
               AND consumed_count = published_count",
        )
        .fetch_all(&self.pool)
        .await
        .context("scan for aggregatable jobs")?;
        rows.iter().map(row_to_job).collect()
    }
}

pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn upsert(&self, doc: &EnrichedDocument) -> Result<()> {
        let data = serde_json::to_value(&doc.enriched_data).context("encode enriched data")?;
        let quality =
            serde_json::to_value(&doc.quality_metrics).context("encode quality metrics")?;
        let review = match doc.review_status {
            ReviewStatus::Approved => "approved",
            ReviewStatus::Pending => "pending",
        };

        sqlx::query(
            r#"
            INSERT INTO enriched_documents
                (document_id, enrichment_job_id, enriched_data, quality_metrics,
                 review_status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (document_id) DO UPDATE SET
                enrichment_job_id = EXCLUDED.enrichment_job_id,
                enriched_data = EXCLUDED.enriched_data,
                quality_metrics = EXCLUDED.quality_metrics,
                review_status = EXCLUDED.review_status
            "#,
        )
        .bind(&doc.document_id)
        .bind(&doc.enrichment_job_id)
        .bind(data)
        .bind(quality)
        .bind(review)
        .bind(doc.created_at)
        .execute(&self.pool)
        .await
        .context("upsert enriched document")?;
        Ok(())
    }

    async fn get(&self, document_id: &str) -> Result<Option<EnrichedDocument>> {
        let row = sqlx::query("SELECT * FROM enriched_documents WHERE document_id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetch enriched document")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data: serde_json::Value = row.try_get("enriched_data")?;
        let quality: serde_json::Value = row.try_get("quality_metrics")?;
        let review: String = row.try_get("review_status")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        Ok(Some(EnrichedDocument {
            document_id: row.try_get("document_id")?,
            enrichment_job_id: row.try_get("enrichment_job_id")?,
            enriched_data: serde_json::from_value::<EnrichedData>(data)
                .context("decode enriched data")?,
            quality_metrics: serde_json::from_value::<QualityMetrics>(quality)
                .context("decode quality metrics")?,
            review_status: if review == "approved" {
                ReviewStatus::Approved
            } else {
                ReviewStatus::Pending
            },
            created_at,
        }))
    }

    async fn insert_review(&self, entry: &ReviewEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO review_queue
                (document_id, enrichment_job_id, completeness_score,
                 missing_fields, low_confidence_fields, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&entry.document_id)
        .bind(&entry.enrichment_job_id)
        .bind(entry.completeness_score)
        .bind(serde_json::to_value(&entry.missing_fields)?)
        .bind(serde_json::to_value(&entry.low_confidence_fields)?)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .context("insert review entry")?;
        Ok(())
    }

    async fn list_reviews(&self) -> Result<Vec<ReviewEntry>> {
        let rows = sqlx::query("SELECT * FROM review_queue ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("list review entries")?;

        rows.iter()
            .map(|row| {
                Ok(ReviewEntry {
                    document_id: row.try_get("document_id")?,
                    enrichment_job_id: row.try_get("enrichment_job_id")?,
                    completeness_score: row.try_get("completeness_score")?,
                    missing_fields: serde_json::from_value(row.try_get("missing_fields")?)?,
                    low_confidence_fields: serde_json::from_value(
                        row.try_get("low_confidence_fields")?,
                    )?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
