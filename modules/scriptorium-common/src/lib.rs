pub mod config;
pub mod error;
pub mod retry;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use error::ScriptoriumError;
pub use retry::{backoff_delay, policy_for, ErrorKind, RetryPolicy};
pub use types::*;
