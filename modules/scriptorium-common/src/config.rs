use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres (job store + queue)
    pub database_url: String,

    // Analysis tool gateway
    pub tool_endpoint: String,
    pub tool_api_key: String,

    // Task worker
    pub worker_max_in_flight: usize,
    pub extract_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,

    // Enrichment worker
    pub enrich_ceiling_secs: u64,
    pub review_threshold: f64,

    // Phase 3 budget
    pub phase3_budget_cents: u64,
    pub budget_period_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            tool_endpoint: required_env("TOOL_ENDPOINT"),
            tool_api_key: required_env("TOOL_API_KEY"),
            worker_max_in_flight: parsed_env("WORKER_MAX_IN_FLIGHT", 4),
            extract_timeout_secs: parsed_env("EXTRACT_TIMEOUT_SECS", 600),
            heartbeat_interval_secs: parsed_env("HEARTBEAT_INTERVAL_SECS", 30),
            enrich_ceiling_secs: parsed_env("ENRICH_CEILING_SECS", 300),
            review_threshold: parsed_env("REVIEW_THRESHOLD", 0.8),
            phase3_budget_cents: parsed_env("PHASE3_BUDGET_CENTS", 5000),
            budget_period_secs: parsed_env("BUDGET_PERIOD_SECS", 86_400),
        }
    }

    /// Load a minimal config for the task worker (no tool gateway needed).
    pub fn worker_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            tool_endpoint: String::new(),
            tool_api_key: String::new(),
            worker_max_in_flight: parsed_env("WORKER_MAX_IN_FLIGHT", 4),
            extract_timeout_secs: parsed_env("EXTRACT_TIMEOUT_SECS", 600),
            heartbeat_interval_secs: parsed_env("HEARTBEAT_INTERVAL_SECS", 30),
            enrich_ceiling_secs: parsed_env("ENRICH_CEILING_SECS", 300),
            review_threshold: parsed_env("REVIEW_THRESHOLD", 0.8),
            phase3_budget_cents: parsed_env("PHASE3_BUDGET_CENTS", 5000),
            budget_period_secs: parsed_env("BUDGET_PERIOD_SECS", 86_400),
        }
    }

    /// Log the config with secrets redacted.
    pub fn log_redacted(&self) {
        info!(
            database_url = redact(&self.database_url).as_str(),
            tool_endpoint = self.tool_endpoint.as_str(),
            worker_max_in_flight = self.worker_max_in_flight,
            extract_timeout_secs = self.extract_timeout_secs,
            enrich_ceiling_secs = self.enrich_ceiling_secs,
            review_threshold = self.review_threshold,
            phase3_budget_cents = self.phase3_budget_cents,
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be parseable: {e:?}")),
        Err(_) => default,
    }
}

/// Strip credentials from a connection URL for logging.
fn redact(url: &str) -> String {
    match url.split_once('@') {
        Some((_, host)) => format!("postgres://***@{host}"),
        None => url.to_string(),
    }
}
