//! Aggregation sweep: close out jobs whose every published task has been
//! consumed. A job completes even when its error list is non-empty — progress
//! reflects consumption, not success.

use anyhow::Result;
use tracing::info;

use scriptorium_store::JobStore;

/// Mark every ready job completed. Returns the number closed.
pub async fn run_aggregation_sweep(store: &dyn JobStore) -> Result<u32> {
    let ready = store.find_ready_for_aggregation().await?;
    let mut closed = 0;
    for job in ready {
        store.mark_completed(&job.job_id).await?;
        info!(
            job_id = %job.job_id,
            consumed = job.consumed_count,
            errors = job.checkpoint.errors.len(),
            "Job aggregated"
        );
        closed += 1;
    }
    Ok(closed)
}
