use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scriptorium_common::EnrichedDocument;

/// One entry in the human-review queue: carries the concrete field lists, not
/// a boolean flag, so a reviewer knows what to look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub document_id: String,
    pub enrichment_job_id: String,
    pub completeness_score: f64,
    pub missing_fields: Vec<String>,
    pub low_confidence_fields: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write the full document. Either the whole document lands or nothing
    /// does; a re-run replaces the previous version wholesale.
    async fn upsert(&self, doc: &EnrichedDocument) -> Result<()>;

    async fn get(&self, document_id: &str) -> Result<Option<EnrichedDocument>>;

    async fn insert_review(&self, entry: &ReviewEntry) -> Result<()>;

    async fn list_reviews(&self) -> Result<Vec<ReviewEntry>>;
}
