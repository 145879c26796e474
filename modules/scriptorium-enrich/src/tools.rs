//! The analysis tool roster and invocation seam.
//!
//! Tool costs vary by orders of magnitude, so each spec carries its own
//! timeout and a designated fallback payload — a single global timeout would
//! either starve the historian or waste time waiting on the classifier.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use scriptorium_common::retry::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    One,
    Two,
    Three,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::One => write!(f, "phase1"),
            Phase::Two => write!(f, "phase2"),
            Phase::Three => write!(f, "phase3"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ToolError {
    /// Map onto the shared retry taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::Timeout(_) => ErrorKind::Timeout,
            ToolError::RateLimited => ErrorKind::RateLimited,
            ToolError::Http { status, .. } if *status >= 500 => ErrorKind::Transient,
            ToolError::Http { .. } => ErrorKind::Permanent,
            ToolError::Network(_) => ErrorKind::Transient,
            ToolError::InvalidResponse(_) => ErrorKind::Permanent,
        }
    }
}

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        agent_id: &str,
        tool: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value, ToolError>;
}

/// Where a tool's output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Actual,
    Fallback,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Actual => "actual",
            Source::Fallback => "fallback",
        }
    }
}

/// One tool's wrapped result. `output` carries a `_source` tag so downstream
/// consumers of the raw payload can distinguish genuine output from a
/// substitute.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub name: &'static str,
    pub phase: Phase,
    pub source: Source,
    pub output: Value,
}

pub struct ToolSpec {
    pub name: &'static str,
    pub agent_id: &'static str,
    pub phase: Phase,
    pub timeout: Duration,
    /// Charged against the period budget when the tool actually runs.
    pub cost_cents: u64,
    pub fallback: fn() -> Value,
}

/// The fixed tool roster.
pub fn registry() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "extract_metadata",
            agent_id: "archivist-metadata",
            phase: Phase::One,
            timeout: Duration::from_secs(20),
            cost_cents: 1,
            fallback: || json!({}),
        },
        ToolSpec {
            name: "extract_entities",
            agent_id: "archivist-entities",
            phase: Phase::One,
            timeout: Duration::from_secs(30),
            cost_cents: 1,
            fallback: || json!({ "entities": [] }),
        },
        ToolSpec {
            name: "classify_document",
            agent_id: "archivist-classifier",
            phase: Phase::One,
            timeout: Duration::from_secs(15),
            cost_cents: 1,
            fallback: || json!({}),
        },
        ToolSpec {
            name: "summarize_content",
            agent_id: "archivist-summarizer",
            phase: Phase::One,
            timeout: Duration::from_secs(30),
            cost_cents: 1,
            fallback: || json!({ "keywords": [] }),
        },
        ToolSpec {
            name: "infer_relationships",
            agent_id: "archivist-relationships",
            phase: Phase::Two,
            timeout: Duration::from_secs(45),
            cost_cents: 5,
            fallback: || json!({ "relationships": [] }),
        },
        ToolSpec {
            name: "build_biographical_context",
            agent_id: "archivist-context",
            phase: Phase::Two,
            timeout: Duration::from_secs(60),
            cost_cents: 5,
            fallback: || json!({}),
        },
        ToolSpec {
            name: "assess_historical_significance",
            agent_id: "archivist-historian",
            phase: Phase::Three,
            timeout: Duration::from_secs(180),
            cost_cents: 40,
            fallback: || json!({}),
        },
    ]
}
