//! Period budget for the expensive phase. Phases 1 and 2 are cheap enough to
//! always run; Phase 3 is gated so exhaustion becomes a recorded skip instead
//! of a failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::tools::Phase;

pub trait BudgetGate: Send + Sync {
    fn is_phase_affordable(&self, phase: Phase) -> bool;
    fn record_spend(&self, phase: Phase, cost_cents: u64);
}

/// Spend counter against a per-period cap with rollover.
pub struct PeriodBudget {
    cap_cents: u64,
    period: Duration,
    spent_cents: AtomicU64,
    period_start: Mutex<Instant>,
}

impl PeriodBudget {
    pub fn new(cap_cents: u64, period: Duration) -> Self {
        Self {
            cap_cents,
            period,
            spent_cents: AtomicU64::new(0),
            period_start: Mutex::new(Instant::now()),
        }
    }

    fn roll_period(&self) {
        let mut start = self.period_start.lock().expect("budget lock");
        if start.elapsed() >= self.period {
            *start = Instant::now();
            self.spent_cents.store(0, Ordering::Relaxed);
        }
    }

    pub fn spent(&self) -> u64 {
        self.spent_cents.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> u64 {
        self.cap_cents.saturating_sub(self.spent())
    }
}

impl BudgetGate for PeriodBudget {
    fn is_phase_affordable(&self, phase: Phase) -> bool {
        if phase != Phase::Three {
            return true;
        }
        self.roll_period();
        self.spent() < self.cap_cents
    }

    fn record_spend(&self, _phase: Phase, cost_cents: u64) {
        self.roll_period();
        self.spent_cents.fetch_add(cost_cents, Ordering::Relaxed);
    }
}
