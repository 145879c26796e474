use std::time::Duration;

use rand::Rng;

/// Classification of a failed call. The task worker only distinguishes
/// retryable-vs-exhausted; the orchestrator keys its per-tool policy off the
/// full taxonomy. Both layers evaluate the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network hiccups, connection resets, 5xx responses.
    Transient,
    /// Explicit backpressure (429); retryable with a longer base delay.
    RateLimited,
    /// The call exceeded its deadline.
    Timeout,
    /// Validation or client errors; retrying cannot help.
    Permanent,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retryable: bool,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// Policy table keyed by error kind.
pub fn policy_for(kind: ErrorKind) -> RetryPolicy {
    match kind {
        ErrorKind::Transient => RetryPolicy {
            retryable: true,
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        },
        ErrorKind::RateLimited => RetryPolicy {
            retryable: true,
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        },
        ErrorKind::Timeout => RetryPolicy {
            retryable: true,
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
        },
        ErrorKind::Permanent => RetryPolicy {
            retryable: false,
            max_attempts: 1,
            base_delay: Duration::ZERO,
        },
    }
}

/// Exponential backoff for the given zero-based attempt, plus 0-500ms jitter
/// so racing workers do not retry in lockstep.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy.base_delay * 2u32.saturating_pow(attempt);
    let jitter = Duration::from_millis(rand::rng().random_range(0..500));
    exp + jitter
}
