//! Per-host rolling statistics (spec §3 "Host dashboard", §4.3) and the
//! process-wide intern table that hands out shared handles to them
//! (spec §3 "Dashboard storage").

mod storage;

pub use self::storage::DashboardStorage;

use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::agent::stats::{Outcome, OUTCOME_COUNT};
use crate::pool::PersistentConnectionPool;

/// Number of time buckets kept per host (`STATS_DASH_TIME`).
pub const STATS_DASH_TIME: usize = 15;

/// One time-bucketed statistics slot. A bucket whose `timestamp` doesn't
/// match the current period index is stale and is reset in place before
/// use (a "reused slot").
#[derive(Clone, Copy, Default, Debug)]
struct AgentDash {
    timestamp: u32,
    counters: [u64; OUTCOME_COUNT],
    total_msecs: u64,
    conn_tries: u64,
    max_msecs: u64,
    avg_msecs: u64,
}

impl AgentDash {
    fn touch(&mut self, period: u32) {
        if self.timestamp != period {
            *self = AgentDash::default();
            self.timestamp = period;
        }
    }

    fn add_into(&self, accum: &mut AgentDash) {
        for i in 0..OUTCOME_COUNT {
            accum.counters[i] += self.counters[i];
        }
        accum.total_msecs += self.total_msecs;
        accum.conn_tries += self.conn_tries;
        accum.avg_msecs += self.avg_msecs;
        if self.max_msecs > accum.max_msecs {
            accum.max_msecs = self.max_msecs;
        }
    }
}

/// A snapshot of one or more summed dashboard buckets, returned by
/// `HostDashboard::collected_stat` under the read lock.
#[derive(Clone, Copy, Default, Debug)]
pub struct HostStatSnapshot {
    counters: [u64; OUTCOME_COUNT],
    pub total_msecs: u64,
    pub conn_tries: u64,
    pub max_msecs: u64,
    pub avg_msecs: u64,
}

impl HostStatSnapshot {
    pub fn get(&self, outcome: Outcome) -> u64 {
        self.counters[outcome as usize]
    }

    /// Sum of every outcome counter in the window, including pings.
    pub fn total_queries(&self) -> u64 {
        self.counters.iter().sum()
    }
}

fn current_epoch_secs() -> u32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs() & 0xFFFF_FFFF) as u32
}

/// Monotonic edge detector, rate-limiting weight recalculation to at most
/// once per half-period (spec §4.3 `IsHalfPeriodChanged`). Generic over
/// whatever timestamp the caller owns — a `MirrorGroup`'s own
/// last-recalculation timestamp, in this crate's usage.
pub fn is_half_period_changed(karma_period_secs: u32, last: &mut u32) -> bool {
    let now = current_epoch_secs();
    if now.wrapping_sub(*last) > karma_period_secs / 2 {
        *last = now;
        true
    } else {
        false
    }
}

struct RingState {
    buckets: [AgentDash; STATS_DASH_TIME],
    consecutive_errors: i64,
    last_query_start_us: i64,
    last_answer_end_us: i64,
}

impl Default for RingState {
    fn default() -> RingState {
        RingState {
            buckets: [AgentDash::default(); STATS_DASH_TIME],
            consecutive_errors: 0,
            last_query_start_us: 0,
            last_answer_end_us: 0,
        }
    }
}

/// One per unique agent URL. Ring of 15 time buckets used both to bill
/// outcomes and to rank replicas, plus the shared persistent-connection
/// pool for that host.
pub struct HostDashboard {
    pub url: String,
    karma_period_secs: u32,
    state: RwLock<RingState>,
    needs_ping: ::std::sync::atomic::AtomicBool,
    pool: Option<PersistentConnectionPool>,
}

fn period_index(karma_period_secs: u32, now: u32) -> (u32, usize) {
    let period = now / karma_period_secs;
    let idx = (period as usize) % STATS_DASH_TIME;
    (period, idx)
}

impl HostDashboard {
    pub fn new(url: String, karma_period_secs: u32, pool_capacity: usize) -> HostDashboard {
        HostDashboard {
            url,
            karma_period_secs,
            state: RwLock::new(RingState::default()),
            needs_ping: ::std::sync::atomic::AtomicBool::new(false),
            pool: Some(PersistentConnectionPool::new(pool_capacity)),
        }
    }

    pub fn pool(&self) -> Option<&PersistentConnectionPool> {
        self.pool.as_ref()
    }

    pub fn needs_ping(&self) -> bool {
        self.needs_ping.load(::std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_needs_ping(&self, needed: bool) {
        self.needs_ping.store(needed, ::std::sync::atomic::Ordering::Relaxed);
    }

    pub fn consecutive_errors(&self) -> i64 {
        self.state.read().unwrap().consecutive_errors
    }

    pub fn last_answer_end_us(&self) -> i64 {
        self.state.read().unwrap().last_answer_end_us
    }

    pub fn last_query_start_us(&self) -> i64 {
        self.state.read().unwrap().last_query_start_us
    }

    /// `IsOlder`: whether the dashboard hasn't heard from the host in more
    /// than one ping interval.
    pub fn is_older(&self, now_us: i64, ping_interval_ms: i64) -> bool {
        (now_us - self.last_answer_end_us()) > ping_interval_ms * 1000
    }

    /// Bills one outcome against both the current bucket and the
    /// consecutive-errors counter (`agent_stats_inc`). `is_ping` attempts
    /// don't contribute to `total_msecs`.
    pub fn bill(&self, outcome: Outcome, is_ping: bool, start_us: i64, end_us: i64) {
        let (period, idx) = period_index(self.karma_period_secs, current_epoch_secs());
        let mut st = self.state.write().unwrap();
        st.buckets[idx].touch(period);
        st.buckets[idx].counters[outcome as usize] += 1;
        if outcome.is_error() {
            st.consecutive_errors += 1;
        } else {
            st.consecutive_errors = 0;
        }
        st.last_query_start_us = start_us;
        st.last_answer_end_us = end_us;
        if !is_ping {
            st.buckets[idx].total_msecs += ((end_us - start_us) / 1000) as u64;
        }
    }

    /// `track_processing_time`: records a successful connect's elapsed
    /// time into the current bucket's running average.
    pub fn track_connect(&self, sample_msecs: u64) {
        let (period, idx) = period_index(self.karma_period_secs, current_epoch_secs());
        let mut st = self.state.write().unwrap();
        st.buckets[idx].touch(period);
        let b = &mut st.buckets[idx];
        b.conn_tries += 1;
        if sample_msecs > b.max_msecs {
            b.max_msecs = sample_msecs;
        }
        b.avg_msecs = if b.conn_tries > 1 {
            (b.avg_msecs * (b.conn_tries - 1) + sample_msecs) / b.conn_tries
        } else {
            sample_msecs
        };
    }

    /// `GetCollectedStat`: sums up to `min(periods, STATS_DASH_TIME)` of
    /// the most recent buckets, smoothing the trailing edge the same way
    /// the original does.
    pub fn collected_stat(&self, mut periods: usize) -> HostStatSnapshot {
        let now = current_epoch_secs();
        if now % self.karma_period_secs < self.karma_period_secs / 2 {
            periods += 1;
        }
        periods = periods.min(STATS_DASH_TIME);

        let (mut period, mut idx) = period_index(self.karma_period_secs, now);
        let st = self.state.read().unwrap();
        let mut accum = AgentDash::default();
        for _ in 0..periods {
            let bucket = &st.buckets[idx];
            if bucket.timestamp == period {
                bucket.add_into(&mut accum);
            }
            period = period.wrapping_sub(1);
            idx = if idx == 0 { STATS_DASH_TIME - 1 } else { idx - 1 };
        }

        HostStatSnapshot {
            counters: accum.counters,
            total_msecs: accum.total_msecs,
            conn_tries: accum.conn_tries,
            max_msecs: accum.max_msecs,
            avg_msecs: accum.avg_msecs,
        }
    }
}
