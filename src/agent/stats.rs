//! The outcome taxonomy (spec §7) and the fixed-width counter blocks billed
//! against it. `Outcome` indexes both the permanent `AgentStats` block and
//! each dashboard ring bucket (`dashboard::AgentDash`), so the two always
//! agree on layout.

use std::sync::atomic::{AtomicU64, Ordering};

/// Exhaustive outcome taxonomy. Order matters: `COUNT` and the `host_*`
/// fields of `AgentStats`/`AgentDash` are sized off it, and `is_error`
/// depends on where the "non-error" boundary falls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Outcome {
    TimeoutsQuery = 0,
    TimeoutsConnect,
    ConnectFailures,
    NetworkErrors,
    WrongReplies,
    UnexpectedClose,
    /// Never billed directly; kept for wire-compatible enum numbering
    /// (spec §9 open question). Warnings are folded into `NetworkCritical`/
    /// `NetworkNonCritical` at billing time instead.
    Warnings,
    NetworkCritical,
    NetworkNonCritical,
}

pub const OUTCOME_COUNT: usize = 9;

impl Outcome {
    /// Non-error outcomes reset the dashboard's consecutive-errors counter;
    /// everything before them increments it (spec §4.3 billing).
    pub fn is_error(self) -> bool {
        (self as usize) < (Outcome::NetworkCritical as usize)
    }
}

/// Fixed-width counters over the outcome taxonomy, plus the host-level
/// aggregates the original calls `ehTotalMsecs`/`ehConnTries`/`ehMaxMsecs`/
/// `ehAverageMsecs`.
#[derive(Default, Debug)]
pub struct AgentStats {
    counters: [AtomicU64; OUTCOME_COUNT],
    pub total_msecs: AtomicU64,
    pub connect_tries: AtomicU64,
    pub max_msecs: AtomicU64,
    /// Stored as fixed-point microseconds to keep the running average
    /// computation lock-free and integer-only, matching the original's
    /// integer `avg = (avg*(n-1) + sample)/n`.
    pub avg_msecs: AtomicU64,
}

impl AgentStats {
    pub fn new() -> AgentStats {
        AgentStats::default()
    }

    pub fn incr(&self, outcome: Outcome) {
        self.counters[outcome as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, outcome: Outcome) -> u64 {
        self.counters[outcome as usize].load(Ordering::Relaxed)
    }

    /// Running-average connect time update, mirroring `track_processing_time`:
    /// `avg <- (avg*(tries-1) + sample) / tries`.
    pub fn track_connect(&self, sample_msecs: u64) {
        let tries = self.connect_tries.fetch_add(1, Ordering::Relaxed) + 1;
        let mut max = self.max_msecs.load(Ordering::Relaxed);
        while sample_msecs > max {
            match self.max_msecs
                .compare_exchange_weak(max, sample_msecs, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(cur) => max = cur,
            }
        }
        if tries > 1 {
            let prev = self.avg_msecs.load(Ordering::Relaxed);
            let next = (prev * (tries - 1) + sample_msecs) / tries;
            self.avg_msecs.store(next, Ordering::Relaxed);
        } else {
            self.avg_msecs.store(sample_msecs, Ordering::Relaxed);
        }
    }

    pub fn add_total_msecs(&self, msecs: u64) {
        self.total_msecs.fetch_add(msecs, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_error_boundary() {
        assert!(Outcome::WrongReplies.is_error());
        assert!(!Outcome::NetworkCritical.is_error());
        assert!(!Outcome::NetworkNonCritical.is_error());
    }

    #[test]
    fn incr_and_get() {
        let s = AgentStats::new();
        s.incr(Outcome::ConnectFailures);
        s.incr(Outcome::ConnectFailures);
        assert_eq!(s.get(Outcome::ConnectFailures), 2);
        assert_eq!(s.get(Outcome::NetworkErrors), 0);
    }

    #[test]
    fn track_connect_running_average() {
        let s = AgentStats::new();
        s.track_connect(10);
        s.track_connect(20);
        s.track_connect(30);
        assert_eq!(s.connect_tries.load(Ordering::Relaxed), 3);
        assert_eq!(s.avg_msecs.load(Ordering::Relaxed), 20);
        assert_eq!(s.max_msecs.load(Ordering::Relaxed), 30);
    }
}
