//! Shared liveness state for the /health endpoint. Updated by the
//! orchestrator, read by the API.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    /// Unix seconds of the last completed cycle (0 = none yet).
    pub last_cycle_at: AtomicI64,
    pub cycles_completed: AtomicU64,
    pub consecutive_failures: AtomicU32,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, at: i64) {
        self.last_cycle_at.store(at, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn last_cycle_at(&self) -> i64 {
        self.last_cycle_at.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}
