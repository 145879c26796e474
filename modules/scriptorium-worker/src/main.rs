use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use scriptorium_common::{telemetry, Config};
use scriptorium_queue::{PgQueue, TaskQueue};
use scriptorium_store::{JobStore, PgJobStore};
use scriptorium_worker::aggregation::run_aggregation_sweep;
use scriptorium_worker::control::run_control_loop;
use scriptorium_worker::{PlainTextExtractor, TaskWorker, WorkerConfig, WorkerControl};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    info!("Scriptorium task worker starting...");

    let config = Config::worker_from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    scriptorium_store::migrate(&pool).await?;
    PgQueue::migrate(&pool).await?;

    let queue: Arc<dyn TaskQueue> = Arc::new(PgQueue::new(pool.clone()));
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));
    let control = Arc::new(WorkerControl::new());

    let worker_config = WorkerConfig {
        max_in_flight: config.worker_max_in_flight,
        extract_timeout: Duration::from_secs(config.extract_timeout_secs),
        heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
        ..WorkerConfig::default()
    };
    let worker = Arc::new(TaskWorker::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::new(PlainTextExtractor),
        Arc::clone(&control),
        worker_config,
    ));

    // Control consumer
    {
        let queue = Arc::clone(&queue);
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            if let Err(e) = run_control_loop(queue.as_ref(), control.as_ref()).await {
                warn!(error = %e, "Control loop exited");
            }
        });
    }

    // Aggregation ticker
    {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(10));
            loop {
                tick.tick().await;
                match run_aggregation_sweep(store.as_ref()).await {
                    Ok(0) => {}
                    Ok(n) => info!(jobs = n, "Aggregation sweep closed jobs"),
                    Err(e) => warn!(error = %e, "Aggregation sweep failed"),
                }
            }
        });
    }

    worker.run().await
}
