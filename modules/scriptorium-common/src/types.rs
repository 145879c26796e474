use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// --- Job lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Paused,
    Completed,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Paused => write!(f, "paused"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobProgress {
    pub current: u32,
    pub total: u32,
    pub percentage: f64,
    pub current_filename: Option<String>,
}

impl JobProgress {
    /// The single place progress percentage arithmetic lives: two-decimal
    /// rounding, float division. Every store implementation calls this.
    pub fn percentage_of(consumed: u32, total: u32) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let raw = consumed as f64 / total as f64 * 100.0;
        (raw * 100.0).round() / 100.0
    }
}

/// Durable record of which work a job has already absorbed. The sets are the
/// authority for "has this file/message been handled"; results and errors
/// accumulate in commit order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobCheckpoint {
    pub processed_count: u32,
    pub results: Vec<FileResult>,
    pub errors: Vec<FileError>,
    pub processed_file_paths: HashSet<String>,
    pub processed_message_ids: HashSet<String>,
    pub retry_count: HashMap<String, u32>,
    pub consecutive_errors: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub total_files: u32,
    pub published_count: u32,
    pub consumed_count: u32,
    pub progress: JobProgress,
    pub checkpoint: JobCheckpoint,
    /// Set when the job as a whole fails (store unreachable, ...); individual
    /// file failures live in the checkpoint error list instead.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, total_files: u32) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Processing,
            total_files,
            published_count: 0,
            consumed_count: 0,
            progress: JobProgress {
                current: 0,
                total: total_files,
                percentage: 0.0,
                current_filename: None,
            },
            checkpoint: JobCheckpoint::default(),
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// A job is ready for aggregation once every published task has been
    /// consumed (successfully or as a terminal error).
    pub fn is_ready_for_aggregation(&self) -> bool {
        self.status == JobStatus::Processing
            && self.published_count > 0
            && self.consumed_count == self.published_count
    }
}

// --- Per-file outcomes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FileResult {
    pub file_path: String,
    pub file_index: u32,
    pub status: ResultStatus,
    pub extracted_text: String,
    pub confidence: f64,
    /// Provider-specific payload (structured vision output, page metrics, ...).
    pub metadata: serde_json::Value,
    pub retry_count: u32,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FileError {
    pub file_path: String,
    pub error_message: String,
    pub processed_at: DateTime<Utc>,
}

// --- Queue messages ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Standard,
    Vision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FileTask {
    pub job_id: String,
    pub file_path: String,
    pub file_index: u32,
    pub processing_mode: ProcessingMode,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub handwriting: bool,
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ControlMessage {
    pub job_id: String,
    pub action: ControlAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EnrichmentTask {
    pub task_id: String,
    pub enrichment_job_id: String,
    pub document_id: String,
    /// Number of documents published under this enrichment job. The consumer
    /// that creates the job row first records it as the published count, so
    /// the job aggregates only after the whole batch is consumed. Zero means
    /// unknown; such jobs are never auto-aggregated.
    #[serde(default)]
    pub batch_size: u32,
    pub ocr_data: serde_json::Value,
    #[serde(default)]
    pub collection_metadata: Option<serde_json::Value>,
}

// --- Enriched document ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    Pending,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetadataSection {
    pub title: Option<String>,
    /// Document date as written in the source (ISO 8601 where determinable).
    pub date: Option<String>,
    pub correspondent: Option<String>,
    pub recipient: Option<String>,
    pub location: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentSection {
    pub doc_type: Option<String>,
    pub salutation: Option<String>,
    pub closing: Option<String>,
    pub paragraph_count: Option<u32>,
    pub page_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NamedEntity {
    pub name: String,
    /// "person", "place", "organization", "date", ...
    pub kind: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContentSection {
    pub text: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub entities: Vec<NamedEntity>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Relationship {
    pub name: String,
    pub relation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisSection {
    pub biographical_context: Option<String>,
    pub historical_significance: Option<String>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    pub sentiment: Option<String>,
}

/// The four-section canonical enriched document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EnrichedData {
    pub metadata: MetadataSection,
    pub document: DocumentSection,
    pub content: ContentSection,
    pub analysis: AnalysisSection,
    /// True when the budget gate declined Phase 3 — "unavailable by design",
    /// distinct from a tool failure.
    #[serde(default)]
    pub phase3_skipped: bool,
    /// Per-field confidence recorded during merge, keyed by dotted field path.
    #[serde(default)]
    pub field_confidence: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QualityMetrics {
    pub completeness_score: f64,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub low_confidence_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EnrichedDocument {
    pub document_id: String,
    pub enrichment_job_id: String,
    pub enriched_data: EnrichedData,
    pub quality_metrics: QualityMetrics,
    pub review_status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}
