//! A group of mirrors backing one logical agent, and the replica-selection
//! strategies choosing among them (spec §4.4, `MultiAgentDesc_t` in the
//! original).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use rand::Rng;

use crate::agent::desc::{AgentDesc, HaStrategy};
use crate::agent::stats::Outcome;
use crate::dashboard::is_half_period_changed;

/// Consecutive-errors ceiling past which `AvoidDead` stops treating a
/// mirror as "alive" (`ErrorsARow` threshold in the original).
const ERRORS_A_ROW_THRESHOLD: i64 = 3;

/// Error rates at or below this are floored to zero, so a mirror with a
/// handful of errors in a busy window isn't penalized like one in steady
/// decline.
const CRITICAL_ERROR_RATE_FLOOR: f64 = 0.03;

/// Sum every mirror's weight vector is normalized to.
const WEIGHT_SUM: u32 = 65535;

/// How many dashboard periods back strategies look when judging recent
/// health.
const STRATEGY_WINDOW_PERIODS: usize = 2;

/// Produces a fresh weight vector from per-mirror latency samples (one
/// entry per mirror, in mirror order). Must preserve `Σweights == 65535`
/// and assign lower latency a larger share (spec §4.4 "Weight
/// recalculation"); pluggable so callers can swap in a different
/// rebalancer without touching selection logic.
pub type Rebalance = fn(&[i64]) -> Vec<u16>;

/// Inverse-latency rebalancer: weight ∝ 1/(latency_ms + 1), normalized to
/// sum to 65535 with any rounding remainder folded into the first mirror.
pub fn default_rebalance(latencies: &[i64]) -> Vec<u16> {
    let n = latencies.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![WEIGHT_SUM as u16];
    }

    let inv: Vec<f64> = latencies.iter().map(|&l| 1.0 / (l.max(0) as f64 + 1.0)).collect();
    let total: f64 = inv.iter().sum();
    let mut weights: Vec<u16> = inv.iter()
        .map(|v| ((v / total) * WEIGHT_SUM as f64) as u16)
        .collect();

    let assigned: u32 = weights.iter().map(|&w| w as u32).sum();
    if let Some(remainder) = WEIGHT_SUM.checked_sub(assigned) {
        weights[0] = weights[0].saturating_add(remainder as u16);
    }
    weights
}

fn initial_weights(n: usize) -> Vec<u16> {
    if n == 0 {
        return Vec::new();
    }
    vec![(WEIGHT_SUM / n as u32) as u16; n]
}

fn error_outcomes() -> [Outcome; 6] {
    [Outcome::TimeoutsQuery,
     Outcome::TimeoutsConnect,
     Outcome::ConnectFailures,
     Outcome::NetworkErrors,
     Outcome::WrongReplies,
     Outcome::UnexpectedClose]
}

fn choose_random(mirrors: &[AgentDesc]) -> usize {
    rand::thread_rng().gen_range(0, mirrors.len())
}

fn choose_round_robin(mirrors: &[AgentDesc], counter: &AtomicUsize) -> usize {
    let n = mirrors.len();
    loop {
        let cur = counter.load(Ordering::Relaxed);
        let next = (cur + 1) % n;
        if counter.compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok() {
            return cur % n;
        }
    }
}

/// Weighted-random tiebreak over `best` plus `candidates` (spec §4.4
/// "Weighted random"): draw uniformly over the combined weight, walk the
/// running prefix sum starting with `best`.
fn weighted_random_tiebreak(best: usize, candidates: &[usize], weights: &[u16]) -> usize {
    let limit: u32 = weights[best] as u32 +
                     candidates.iter().map(|&c| weights[c] as u32).sum::<u32>();
    if limit == 0 {
        return best;
    }
    let mut chance = rand::thread_rng().gen_range(0, limit);
    if chance < weights[best] as u32 {
        return best;
    }
    chance -= weights[best] as u32;
    for &c in candidates {
        if chance < weights[c] as u32 {
            return c;
        }
        chance -= weights[c] as u32;
    }
    best
}

/// One logical agent, backed by one or more interchangeable mirrors.
pub struct MirrorGroup {
    pub mirrors: Vec<AgentDesc>,
    strategy: HaStrategy,
    karma_period_secs: u32,
    pub retry_count: i32,
    pub retry_count_multiplier: i32,
    rr_counter: AtomicUsize,
    weights: RwLock<Vec<u16>>,
    last_rebalance: Mutex<u32>,
    rebalance: Rebalance,
}

impl MirrorGroup {
    pub fn new(mirrors: Vec<AgentDesc>,
               strategy: HaStrategy,
               karma_period_secs: u32,
               retry_count: i32,
               retry_count_multiplier: i32)
               -> MirrorGroup {
        if mirrors.len() > 1 {
            for m in &mirrors {
                m.dash.set_needs_ping(true);
            }
        }
        let weights = initial_weights(mirrors.len());
        MirrorGroup {
            mirrors,
            strategy,
            karma_period_secs,
            retry_count,
            retry_count_multiplier,
            rr_counter: AtomicUsize::new(0),
            weights: RwLock::new(weights),
            last_rebalance: Mutex::new(0),
            rebalance: default_rebalance,
        }
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Picks one mirror index according to the group's `HaStrategy`.
    /// Callers must reject empty groups at construction time
    /// (`Error::EmptyMirrorGroup`); an empty group here would panic.
    pub fn choose(&self) -> usize {
        if self.mirrors.len() == 1 {
            return 0;
        }
        match self.strategy {
            HaStrategy::Random => choose_random(&self.mirrors),
            HaStrategy::RoundRobin => choose_round_robin(&self.mirrors, &self.rr_counter),
            HaStrategy::AvoidDead => self.choose_avoid_dead(),
            HaStrategy::AvoidErrors => self.choose_avoid_errors(),
        }
    }

    fn choose_avoid_dead(&self) -> usize {
        let effective: Vec<i64> = self.mirrors
            .iter()
            .map(|m| {
                let raw = m.dash.consecutive_errors();
                if raw <= ERRORS_A_ROW_THRESHOLD {
                    0
                } else {
                    raw
                }
            })
            .collect();
        self.maybe_rebalance();

        let min_val = match effective.iter().min() {
            Some(&v) => v,
            None => return choose_random(&self.mirrors),
        };
        let candidates: Vec<usize> = (0..effective.len())
            .filter(|&i| effective[i] == min_val)
            .collect();

        if candidates.len() == 1 {
            return candidates[0];
        }
        let weights = self.weights.read().unwrap();
        weighted_random_tiebreak(candidates[0], &candidates[1..], &weights)
    }

    fn choose_avoid_errors(&self) -> usize {
        let rates: Vec<Option<(f64, f64)>> = self.mirrors
            .iter()
            .map(|m| {
                let snap = m.dash.collected_stat(STRATEGY_WINDOW_PERIODS);
                let total = snap.total_queries();
                let hard_errors: u64 = error_outcomes().iter().map(|o| snap.get(*o)).sum();
                let critical = snap.get(Outcome::NetworkCritical);
                let all_errors: u64 = hard_errors + critical;
                let successes = total.saturating_sub(all_errors);
                if total == 0 || successes == 0 {
                    return None;
                }
                let mut critical_rate = hard_errors as f64 / total as f64;
                if critical_rate <= CRITICAL_ERROR_RATE_FLOOR {
                    critical_rate = 0.0;
                }
                let mut all_rate = all_errors as f64 / total as f64;
                if all_rate <= CRITICAL_ERROR_RATE_FLOOR {
                    all_rate = 0.0;
                }
                Some((critical_rate, all_rate))
            })
            .collect();
        self.maybe_rebalance();

        let qualifying: Vec<usize> = (0..rates.len()).filter(|&i| rates[i].is_some()).collect();
        if qualifying.is_empty() {
            return choose_random(&self.mirrors);
        }

        let mut best = qualifying[0];
        for &i in &qualifying[1..] {
            let (best_crit, best_all) = rates[best].unwrap();
            let (crit, all) = rates[i].unwrap();
            if crit < best_crit || (crit == best_crit && all < best_all) {
                best = i;
            }
        }
        let (best_crit, best_all) = rates[best].unwrap();
        let candidates: Vec<usize> = qualifying.iter()
            .cloned()
            .filter(|&i| i != best && rates[i].unwrap() == (best_crit, best_all))
            .collect();

        if candidates.is_empty() {
            return best;
        }
        let weights = self.weights.read().unwrap();
        weighted_random_tiebreak(best, &candidates, &weights)
    }

    /// Recomputes weights at most once per half karma period
    /// (`IsHalfPeriodChanged`), from each mirror's recent average connect
    /// latency.
    fn maybe_rebalance(&self) {
        let mut last = self.last_rebalance.lock().unwrap();
        if is_half_period_changed(self.karma_period_secs, &mut last) {
            let latencies: Vec<i64> = self.mirrors
                .iter()
                .map(|m| m.dash.collected_stat(STRATEGY_WINDOW_PERIODS).avg_msecs as i64)
                .collect();
            let fresh = (self.rebalance)(&latencies);
            *self.weights.write().unwrap() = fresh;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::desc::AddressFamily;
    use crate::agent::stats::AgentStats;
    use crate::dashboard::HostDashboard;
    use std::sync::Arc;

    fn mirror(url: &str) -> AgentDesc {
        AgentDesc {
            family: AddressFamily::Inet,
            addr: url.to_string(),
            resolved: None,
            port: 9312,
            needs_resolve: false,
            persistent: false,
            blackhole: false,
            indexes: vec!["main".to_string()],
            dash: Arc::new(HostDashboard::new(url.to_string(), 60, 0)),
            stats: Arc::new(AgentStats::new()),
        }
    }

    fn group(mirrors: Vec<AgentDesc>, strategy: HaStrategy) -> MirrorGroup {
        MirrorGroup::new(mirrors, strategy, 60, 1, 1)
    }

    #[test]
    fn single_mirror_always_chooses_zero() {
        let g = group(vec![mirror("a")], HaStrategy::Random);
        for _ in 0..10 {
            assert_eq!(g.choose(), 0);
        }
    }

    #[test]
    fn round_robin_cycles_through_all_mirrors() {
        let g = group(vec![mirror("a"), mirror("b"), mirror("c")], HaStrategy::RoundRobin);
        let picks: Vec<usize> = (0..6).map(|_| g.choose()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn multi_mirror_group_marks_dashboards_for_ping() {
        let a = mirror("a");
        let b = mirror("b");
        let dash_a = a.dash.clone();
        let _g = group(vec![a, b], HaStrategy::Random);
        assert!(dash_a.needs_ping());
    }

    #[test]
    fn avoid_dead_excludes_mirrors_past_error_threshold() {
        let dead = mirror("dead");
        for _ in 0..4 {
            dead.dash.bill(Outcome::ConnectFailures, false, 0, 0);
        }
        let alive = mirror("alive");
        let g = group(vec![dead, alive], HaStrategy::AvoidDead);
        for _ in 0..20 {
            assert_eq!(g.choose(), 1);
        }
    }

    #[test]
    fn avoid_errors_skips_mirror_with_no_successes() {
        let broken = mirror("broken");
        broken.dash.bill(Outcome::NetworkErrors, false, 0, 0);
        let healthy = mirror("healthy");
        healthy.dash.bill(Outcome::NetworkNonCritical, false, 0, 0);
        let g = group(vec![broken, healthy], HaStrategy::AvoidErrors);
        for _ in 0..20 {
            assert_eq!(g.choose(), 1);
        }
    }

    #[test]
    fn avoid_errors_prefers_occasional_warnings_over_hard_failures() {
        let flaky = mirror("flaky");
        for _ in 0..5 {
            flaky.dash.bill(Outcome::NetworkErrors, false, 0, 0);
        }
        flaky.dash.bill(Outcome::NetworkNonCritical, false, 0, 0);

        let mostly_healthy = mirror("mostly-healthy");
        for _ in 0..9 {
            mostly_healthy.dash.bill(Outcome::NetworkNonCritical, false, 0, 0);
        }
        mostly_healthy.dash.bill(Outcome::NetworkCritical, false, 0, 0);

        let g = group(vec![flaky, mostly_healthy], HaStrategy::AvoidErrors);
        for _ in 0..20 {
            assert_eq!(g.choose(), 1);
        }
    }

    #[test]
    fn default_rebalance_preserves_weight_sum_and_favors_lower_latency() {
        let weights = default_rebalance(&[10, 100, 1000]);
        assert_eq!(weights.len(), 3);
        let sum: u32 = weights.iter().map(|&w| w as u32).sum();
        assert_eq!(sum, WEIGHT_SUM);
        assert!(weights[0] > weights[1]);
        assert!(weights[1] > weights[2]);
    }

    #[test]
    fn weighted_random_tiebreak_only_returns_best_or_candidates() {
        let weights = vec![100u16, 0, 900];
        for _ in 0..50 {
            let picked = weighted_random_tiebreak(0, &[2], &weights);
            assert!(picked == 0 || picked == 2);
        }
    }
}
