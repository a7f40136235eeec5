use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::buffer::{Half, PeriodBuffer};

/// Read-only snapshot of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Periods completed by the hardware since the session opened.
    pub completions: u64,
    /// Completion count the consumer observed at its last successful wait.
    pub acknowledged: u64,
    /// Periods the consumer failed to process before the next one completed.
    pub under_runs: u64,
}

/// Completion / acknowledgment bookkeeping for one session.
///
/// Every field is a single atomic; the producer only ever increments the
/// completion counter and the consumer owns the other two.
#[derive(Debug, Default)]
pub struct UnderrunTracker {
    completions: AtomicU64,
    acknowledged: AtomicU64,
    under_runs: AtomicU64,
}

impl UnderrunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn seeded(completions: u64, acknowledged: u64) -> Self {
        Self {
            completions: AtomicU64::new(completions),
            acknowledged: AtomicU64::new(acknowledged),
            under_runs: AtomicU64::new(0),
        }
    }

    /// Producer side: one more period is done. Returns the new count.
    #[inline]
    pub fn on_period_complete(&self) -> u64 {
        self.completions
            .fetch_add(1, Ordering::Release)
            .wrapping_add(1)
    }

    /// Consumer side, right after a successful wait: snapshots the completion
    /// count as acknowledged and returns the half the consumer now owns.
    #[inline]
    pub fn on_wait_ready(&self, buffer: &PeriodBuffer) -> Half {
        let completed = self.completions.load(Ordering::Acquire);
        self.acknowledged.store(completed, Ordering::Release);
        buffer.active_half()
    }

    /// Consumer side, once it is done with its half. Periods that completed
    /// since the last acknowledgment were missed; they are added to the
    /// under-run count, which is also returned.
    #[inline]
    pub fn on_user_finished(&self) -> u64 {
        let completed = self.completions.load(Ordering::Acquire);
        let acknowledged = self.acknowledged.swap(completed, Ordering::AcqRel);
        // `acknowledged` is always an earlier value of `completed`, so the
        // modular difference is the true delta even across a wrap.
        let missed = completed.wrapping_sub(acknowledged);
        if missed > 0 {
            self.under_runs.fetch_add(missed, Ordering::Relaxed);
        }
        missed
    }

    #[inline]
    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::Acquire)
    }

    #[inline]
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Acquire)
    }

    #[inline]
    pub fn under_runs(&self) -> u64 {
        self.under_runs.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Diagnostics {
        Diagnostics {
            completions: self.completions(),
            acknowledged: self.acknowledged(),
            under_runs: self.under_runs(),
        }
    }
}
