//! Extraction collaborator seam. Concrete OCR/vision backends live outside
//! this crate; the worker only needs text, a confidence, and whatever
//! provider payload comes back.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use scriptorium_common::ProcessingMode;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub mode: ProcessingMode,
    pub languages: Vec<String>,
    pub handwriting: bool,
}

#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub text: String,
    pub confidence: f64,
    /// Provider-specific payload; for vision backends this carries the
    /// structured visible-field output the enrichment merge prioritizes.
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path, options: &ExtractOptions) -> Result<ExtractionOutput>;
}

/// Reads the file as UTF-8. Covers born-digital text sources; scanned images
/// go through an external OCR backend implementing the same trait.
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, path: &Path, _options: &ExtractOptions) -> Result<ExtractionOutput> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        Ok(ExtractionOutput {
            text,
            confidence: 1.0,
            metadata: serde_json::json!({ "provider": "plain_text" }),
        })
    }
}
