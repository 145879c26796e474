//! Worker-local pause/resume/cancel state.
//!
//! Each worker independently consumes the control topic into these sets;
//! they are mutated only by the control-consumer loop and read everywhere
//! else. Cancellation is cooperative: in-flight extractions are not aborted,
//! their results are simply never committed.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use scriptorium_common::{ControlAction, ControlMessage};
use scriptorium_queue::{topics, TaskQueue};

#[derive(Default)]
struct ControlState {
    paused: HashSet<String>,
    cancelled: HashSet<String>,
}

#[derive(Default)]
pub struct WorkerControl {
    state: Mutex<ControlState>,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self, job_id: &str) -> bool {
        self.state.lock().expect("control lock").paused.contains(job_id)
    }

    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.state
            .lock()
            .expect("control lock")
            .cancelled
            .contains(job_id)
    }

    pub fn apply(&self, message: &ControlMessage) {
        let mut state = self.state.lock().expect("control lock");
        match message.action {
            ControlAction::Pause => {
                state.paused.insert(message.job_id.clone());
            }
            ControlAction::Resume => {
                state.paused.remove(&message.job_id);
            }
            ControlAction::Cancel => {
                state.paused.remove(&message.job_id);
                state.cancelled.insert(message.job_id.clone());
            }
        }
        info!(job_id = %message.job_id, action = ?message.action, "Applied control message");
    }
}

/// Consume the control topic into worker-local state. Runs for the life of
/// the worker process.
pub async fn run_control_loop(queue: &dyn TaskQueue, control: &WorkerControl) -> Result<()> {
    loop {
        let Some(delivery) = queue.consume(topics::CONTROL).await? else {
            tokio::time::sleep(Duration::from_millis(500)).await;
            continue;
        };
        match serde_json::from_slice::<ControlMessage>(&delivery.body) {
            Ok(message) => control.apply(&message),
            Err(e) => warn!(error = %e, "Malformed control message, dropping"),
        }
        queue.ack(&delivery).await?;
    }
}
