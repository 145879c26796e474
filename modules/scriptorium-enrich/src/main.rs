use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use scriptorium_common::{telemetry, Config};
use scriptorium_enrich::{
    AgentOrchestrator, EnrichmentWorker, EnrichmentWorkerConfig, FieldValidator, HttpToolInvoker,
    OrchestratorConfig, PeriodBudget,
};
use scriptorium_queue::{PgQueue, TaskQueue};
use scriptorium_store::{DocumentStore, JobStore, PgDocumentStore, PgJobStore};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    info!("Scriptorium enrichment worker starting...");

    let config = Config::from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    scriptorium_store::migrate(&pool).await?;
    PgQueue::migrate(&pool).await?;

    let queue: Arc<dyn TaskQueue> = Arc::new(PgQueue::new(pool.clone()));
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let documents: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool));

    let orchestrator = Arc::new(AgentOrchestrator::new(
        Arc::new(HttpToolInvoker::new(&config.tool_endpoint, &config.tool_api_key)),
        Arc::new(PeriodBudget::new(
            config.phase3_budget_cents,
            Duration::from_secs(config.budget_period_secs),
        )),
        Arc::new(FieldValidator::new(config.review_threshold)),
        OrchestratorConfig::builder().build(),
    ));

    let worker = Arc::new(EnrichmentWorker::new(
        queue,
        jobs,
        documents,
        orchestrator,
        EnrichmentWorkerConfig {
            run_ceiling: Duration::from_secs(config.enrich_ceiling_secs),
            ..EnrichmentWorkerConfig::default()
        },
    ));

    worker.run().await
}
