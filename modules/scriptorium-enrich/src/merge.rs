//! Provenance-priority merge into the four-section canonical document.
//!
//! Field-by-field rule, not a generic recursive merge: fields directly
//! visible in the source image (dates, correspondent names, salutation and
//! closing structure) prefer the vision-derived `structured` payload in the
//! raw extraction; knowledge-derived fields (biographical context, historical
//! significance, relationships) always come from the agents, because that
//! knowledge is not present in the image.

use std::collections::HashMap;

use serde_json::Value;

use scriptorium_common::{
    AnalysisSection, ContentSection, DocumentSection, EnrichedData, MetadataSection, NamedEntity,
    Relationship,
};

use crate::tools::{Source, ToolOutcome};

const DEFAULT_VISION_CONFIDENCE: f64 = 0.9;
const DEFAULT_AGENT_CONFIDENCE: f64 = 0.8;

fn find<'a>(outcomes: &'a [ToolOutcome], name: &str) -> Option<&'a ToolOutcome> {
    outcomes.iter().find(|o| o.name == name)
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn visible_str(structured: Option<&Value>, key: &str) -> Option<String> {
    non_empty_str(structured.and_then(|s| s.get(key)))
}

fn agent_str(outcome: Option<&ToolOutcome>, key: &str) -> Option<(String, f64)> {
    let outcome = outcome?;
    let value = non_empty_str(outcome.output.get(key))?;
    let confidence = match outcome.source {
        Source::Fallback => 0.0,
        Source::Actual => outcome
            .output
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_AGENT_CONFIDENCE),
    };
    Some((value, confidence))
}

fn agent_list<T: serde::de::DeserializeOwned>(outcome: Option<&ToolOutcome>, key: &str) -> Vec<T> {
    outcome
        .and_then(|o| o.output.get(key))
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

pub fn merge(ocr_data: &Value, outcomes: &[ToolOutcome], phase3_skipped: bool) -> EnrichedData {
    let structured = ocr_data.get("structured");
    let vision_confidence = ocr_data
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_VISION_CONFIDENCE);

    let metadata_out = find(outcomes, "extract_metadata");
    let entities_out = find(outcomes, "extract_entities");
    let classify_out = find(outcomes, "classify_document");
    let summary_out = find(outcomes, "summarize_content");
    let relationships_out = find(outcomes, "infer_relationships");
    let context_out = find(outcomes, "build_biographical_context");
    let historian_out = find(outcomes, "assess_historical_significance");

    let mut confidence: HashMap<String, f64> = HashMap::new();

    let content_text = non_empty_str(ocr_data.get("text"));
    if content_text.is_some() {
        confidence.insert("content.text".to_string(), vision_confidence);
    }

    // Visible-structure fields: vision payload first, agent second.
    let mut pick = |path: &str,
                    visible_key: Option<&str>,
                    outcome: Option<&ToolOutcome>,
                    agent_key: &str|
     -> Option<String> {
        if let Some(key) = visible_key {
            if let Some(value) = visible_str(structured, key) {
                confidence.insert(path.to_string(), vision_confidence);
                return Some(value);
            }
        }
        let (value, agent_confidence) = agent_str(outcome, agent_key)?;
        confidence.insert(path.to_string(), agent_confidence);
        Some(value)
    };

    let metadata = MetadataSection {
        title: pick("metadata.title", None, metadata_out, "title"),
        date: pick("metadata.date", Some("date"), metadata_out, "date"),
        correspondent: pick(
            "metadata.correspondent",
            Some("correspondent"),
            metadata_out,
            "correspondent",
        ),
        recipient: pick("metadata.recipient", Some("recipient"), metadata_out, "recipient"),
        location: pick("metadata.location", Some("location"), metadata_out, "location"),
        language: pick("metadata.language", None, classify_out, "language"),
    };

    let document = DocumentSection {
        doc_type: pick("document.doc_type", None, classify_out, "doc_type"),
        salutation: pick("document.salutation", Some("salutation"), classify_out, "salutation"),
        closing: pick("document.closing", Some("closing"), classify_out, "closing"),
        paragraph_count: structured
            .and_then(|s| s.get("paragraph_count"))
            .and_then(Value::as_u64)
            .or_else(|| {
                classify_out
                    .and_then(|o| o.output.get("paragraph_count"))
                    .and_then(Value::as_u64)
            })
            .map(|n| n as u32),
        page_count: ocr_data
            .get("page_count")
            .and_then(Value::as_u64)
            .map(|n| n as u32),
    };

    let content = ContentSection {
        text: content_text,
        summary: pick("content.summary", None, summary_out, "summary"),
        entities: agent_list::<NamedEntity>(entities_out, "entities"),
        keywords: agent_list::<String>(summary_out, "keywords"),
    };

    // Knowledge-derived fields: agents only, never the visible payload.
    let analysis = AnalysisSection {
        biographical_context: pick(
            "analysis.biographical_context",
            None,
            context_out,
            "biographical_context",
        ),
        historical_significance: pick(
            "analysis.historical_significance",
            None,
            historian_out,
            "historical_significance",
        ),
        relationships: agent_list::<Relationship>(relationships_out, "relationships"),
        sentiment: pick("analysis.sentiment", None, historian_out, "sentiment"),
    };

    EnrichedData {
        metadata,
        document,
        content,
        analysis,
        phase3_skipped,
        field_confidence: confidence,
    }
}
