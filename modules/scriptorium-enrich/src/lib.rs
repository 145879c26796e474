//! Phase-based enrichment: an orchestrator that drives independent analysis
//! tools across three ordered phases (plus validation) over one document's
//! extracted text, and the queue consumer that wraps it.

pub mod budget;
pub mod http;
pub mod merge;
pub mod orchestrator;
pub mod tools;
pub mod validator;
pub mod worker;

pub use budget::{BudgetGate, PeriodBudget};
pub use http::HttpToolInvoker;
pub use orchestrator::{AgentOrchestrator, EnrichmentOutcome, OrchestratorConfig};
pub use tools::{registry, Phase, Source, ToolError, ToolInvoker, ToolOutcome, ToolSpec};
pub use validator::{FieldValidator, SchemaValidator, ValidationReport};
pub use worker::{EnrichmentWorker, EnrichmentWorkerConfig};
