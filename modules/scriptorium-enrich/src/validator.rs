//! Completeness validation. The score is a fraction, not a pass/fail bit:
//! the review decision downstream is driven by the number, and the concrete
//! missing/low-confidence field lists travel with it.

use scriptorium_common::EnrichedData;

/// Fields a fully enriched document must carry, as dotted paths into the
/// four-section layout.
const REQUIRED_FIELDS: &[&str] = &[
    "metadata.title",
    "metadata.date",
    "metadata.correspondent",
    "document.doc_type",
    "content.text",
    "content.summary",
    "analysis.biographical_context",
    "analysis.historical_significance",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub completeness_score: f64,
    pub missing_fields: Vec<String>,
    pub low_confidence_fields: Vec<String>,
    pub passes_threshold: bool,
}

pub trait SchemaValidator: Send + Sync {
    fn validate(&self, data: &EnrichedData) -> ValidationReport;
}

pub struct FieldValidator {
    threshold: f64,
    confidence_floor: f64,
}

impl FieldValidator {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            confidence_floor: 0.5,
        }
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn field_present(data: &EnrichedData, field: &str) -> bool {
    match field {
        "metadata.title" => non_empty(&data.metadata.title),
        "metadata.date" => non_empty(&data.metadata.date),
        "metadata.correspondent" => non_empty(&data.metadata.correspondent),
        "document.doc_type" => non_empty(&data.document.doc_type),
        "content.text" => non_empty(&data.content.text),
        "content.summary" => non_empty(&data.content.summary),
        "analysis.biographical_context" => non_empty(&data.analysis.biographical_context),
        "analysis.historical_significance" => non_empty(&data.analysis.historical_significance),
        _ => false,
    }
}

impl SchemaValidator for FieldValidator {
    fn validate(&self, data: &EnrichedData) -> ValidationReport {
        let mut missing = Vec::new();
        let mut low_confidence = Vec::new();
        let mut present = 0usize;

        for &field in REQUIRED_FIELDS {
            if !field_present(data, field) {
                missing.push(field.to_string());
                continue;
            }
            present += 1;
            if data
                .field_confidence
                .get(field)
                .is_some_and(|&c| c < self.confidence_floor)
            {
                low_confidence.push(field.to_string());
            }
        }

        let completeness_score = present as f64 / REQUIRED_FIELDS.len() as f64;
        ValidationReport {
            completeness_score,
            missing_fields: missing,
            low_confidence_fields: low_confidence,
            passes_threshold: completeness_score >= self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_common::{AnalysisSection, ContentSection, DocumentSection, MetadataSection};

    fn full_data() -> EnrichedData {
        EnrichedData {
            metadata: MetadataSection {
                title: Some("Letter to Margaret".into()),
                date: Some("1969-09-29".into()),
                correspondent: Some("H. Whitfield".into()),
                ..Default::default()
            },
            document: DocumentSection {
                doc_type: Some("personal_letter".into()),
                ..Default::default()
            },
            content: ContentSection {
                text: Some("Dear Margaret, ...".into()),
                summary: Some("A letter about the harvest.".into()),
                ..Default::default()
            },
            analysis: AnalysisSection {
                biographical_context: Some("Whitfield farmed near Ames.".into()),
                historical_significance: Some("Documents rural electrification.".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn complete_document_passes() {
        let report = FieldValidator::new(0.8).validate(&full_data());
        assert_eq!(report.completeness_score, 1.0);
        assert!(report.passes_threshold);
        assert!(report.missing_fields.is_empty());
    }

    #[test]
    fn missing_fields_lower_the_score_and_are_enumerated() {
        let mut data = full_data();
        data.analysis.historical_significance = None;
        data.metadata.date = Some("   ".into());

        let report = FieldValidator::new(0.8).validate(&data);
        assert_eq!(report.completeness_score, 0.75);
        assert!(!report.passes_threshold);
        assert!(report.missing_fields.contains(&"metadata.date".to_string()));
        assert!(report
            .missing_fields
            .contains(&"analysis.historical_significance".to_string()));
    }

    #[test]
    fn low_confidence_fields_are_listed_but_still_count_as_present() {
        let mut data = full_data();
        data.field_confidence.insert("metadata.date".into(), 0.2);

        let report = FieldValidator::new(0.8).validate(&data);
        assert_eq!(report.completeness_score, 1.0);
        assert_eq!(report.low_confidence_fields, vec!["metadata.date".to_string()]);
    }
}
