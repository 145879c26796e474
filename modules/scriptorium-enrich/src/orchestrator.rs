//! The phase driver.
//!
//! Phase 1 fans out concurrently with per-task capture — one tool's failure
//! never aborts the others. Phases 2 and 3 run sequentially because they
//! consume earlier phase output. Phase 3 is asked for permission from the
//! budget gate before any call; a declined phase is skipped whole and marked,
//! not degraded. Every invocation goes through the same wrapper: classify the
//! error, look up the retry policy, honor the tool's own timeout, and fall
//! back to the designated payload when retries run out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use scriptorium_common::retry::{backoff_delay, policy_for};
use scriptorium_common::{EnrichedDocument, EnrichmentTask, ReviewStatus};

use crate::budget::BudgetGate;
use crate::merge;
use crate::tools::{registry, Phase, Source, ToolError, ToolInvoker, ToolOutcome, ToolSpec};
use crate::validator::{SchemaValidator, ValidationReport};

#[derive(Debug, Clone, TypedBuilder)]
pub struct OrchestratorConfig {
    /// Per-tool timeout overrides; the registry's adaptive defaults otherwise.
    #[builder(default)]
    pub timeout_overrides: HashMap<String, Duration>,
    /// Scales retry backoff. Tests run at 0.
    #[builder(default = 1.0)]
    pub backoff_scale: f64,
}

/// What one enrichment run produced: the document, the validation report
/// that drove its review status, and the per-tool outcomes for observability.
pub struct EnrichmentOutcome {
    pub document: EnrichedDocument,
    pub report: ValidationReport,
    pub tools: Vec<ToolOutcome>,
}

pub struct AgentOrchestrator {
    invoker: Arc<dyn ToolInvoker>,
    budget: Arc<dyn BudgetGate>,
    validator: Arc<dyn SchemaValidator>,
    tools: Vec<ToolSpec>,
    config: OrchestratorConfig,
}

impl AgentOrchestrator {
    pub fn new(
        invoker: Arc<dyn ToolInvoker>,
        budget: Arc<dyn BudgetGate>,
        validator: Arc<dyn SchemaValidator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            invoker,
            budget,
            validator,
            tools: registry(),
            config,
        }
    }

    /// Run the full pipeline for one document.
    pub async fn enrich(&self, task: &EnrichmentTask) -> Result<EnrichmentOutcome> {
        let text = task
            .ocr_data
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();

        // Phase 1: independent tools, concurrent, never fail-fast.
        let phase1_args = json!({
            "text": text,
            "collection_metadata": task.collection_metadata,
        });
        let phase1_specs: Vec<&ToolSpec> =
            self.tools.iter().filter(|s| s.phase == Phase::One).collect();
        let mut outcomes: Vec<ToolOutcome> = join_all(
            phase1_specs
                .iter()
                .map(|spec| self.call_tool(spec, &phase1_args)),
        )
        .await;

        // Phase 2: sequential, consumes Phase-1 entities.
        let entities = outcomes
            .iter()
            .find(|o| o.name == "extract_entities")
            .and_then(|o| o.output.get("entities").cloned())
            .unwrap_or_else(|| json!([]));
        let phase2_args = json!({ "text": text, "entities": entities });
        for spec in self.tools.iter().filter(|s| s.phase == Phase::Two) {
            let outcome = self.call_tool(spec, &phase2_args).await;
            outcomes.push(outcome);
        }

        // Phase 3: most expensive; the gate decides whether it runs at all.
        let phase3_skipped = !self.budget.is_phase_affordable(Phase::Three);
        if phase3_skipped {
            info!(
                document_id = %task.document_id,
                "Phase 3 budget exhausted, skipping phase"
            );
        } else {
            let context = outcomes
                .iter()
                .find(|o| o.name == "build_biographical_context")
                .and_then(|o| o.output.get("biographical_context").cloned())
                .unwrap_or(Value::Null);
            let phase3_args = json!({
                "text": text,
                "entities": entities,
                "biographical_context": context,
            });
            for spec in self.tools.iter().filter(|s| s.phase == Phase::Three) {
                let outcome = self.call_tool(spec, &phase3_args).await;
                if outcome.source == Source::Actual {
                    self.budget.record_spend(Phase::Three, spec.cost_cents);
                }
                outcomes.push(outcome);
            }
        }

        // Merge with provenance priority, then validate.
        let enriched = merge::merge(&task.ocr_data, &outcomes, phase3_skipped);
        let report = self.validator.validate(&enriched);

        let document = EnrichedDocument {
            document_id: task.document_id.clone(),
            enrichment_job_id: task.enrichment_job_id.clone(),
            enriched_data: enriched,
            quality_metrics: scriptorium_common::QualityMetrics {
                completeness_score: report.completeness_score,
                missing_fields: report.missing_fields.clone(),
                low_confidence_fields: report.low_confidence_fields.clone(),
            },
            review_status: if report.passes_threshold {
                ReviewStatus::Approved
            } else {
                ReviewStatus::Pending
            },
            created_at: Utc::now(),
        };

        info!(
            document_id = %task.document_id,
            completeness = report.completeness_score,
            phase3_skipped,
            fallbacks = document.quality_metrics.missing_fields.len(),
            "Enrichment pipeline finished"
        );

        Ok(EnrichmentOutcome {
            document,
            report,
            tools: outcomes,
        })
    }

    /// Per-tool invocation wrapper. Never lets a tool failure escape: retries
    /// per the error-kind policy, then substitutes the designated fallback.
    async fn call_tool(&self, spec: &ToolSpec, args: &Value) -> ToolOutcome {
        let timeout = self
            .config
            .timeout_overrides
            .get(spec.name)
            .copied()
            .unwrap_or(spec.timeout);

        let mut attempt: u32 = 0;
        loop {
            let call = self.invoker.invoke(spec.agent_id, spec.name, args, timeout);
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout(timeout)),
            };

            match result {
                Ok(mut output) => {
                    if let Some(map) = output.as_object_mut() {
                        map.insert("_source".to_string(), json!(Source::Actual.as_str()));
                    }
                    debug!(tool = spec.name, attempt, "Tool call succeeded");
                    return ToolOutcome {
                        name: spec.name,
                        phase: spec.phase,
                        source: Source::Actual,
                        output,
                    };
                }
                Err(e) => {
                    let kind = e.kind();
                    let policy = policy_for(kind);
                    attempt += 1;
                    if !policy.retryable || attempt >= policy.max_attempts {
                        warn!(
                            tool = spec.name,
                            attempts = attempt,
                            kind = ?kind,
                            error = %e,
                            "Tool retries exhausted, substituting fallback"
                        );
                        let mut output = (spec.fallback)();
                        if let Some(map) = output.as_object_mut() {
                            map.insert("_source".to_string(), json!(Source::Fallback.as_str()));
                        }
                        return ToolOutcome {
                            name: spec.name,
                            phase: spec.phase,
                            source: Source::Fallback,
                            output,
                        };
                    }
                    let delay =
                        backoff_delay(&policy, attempt - 1).mul_f64(self.config.backoff_scale);
                    warn!(
                        tool = spec.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Tool call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
