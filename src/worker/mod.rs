//! Retry/worker orchestration (spec §4.7): a sequential single-threaded
//! worker multiplexing every attempt over one poller, or a thread pool
//! pulling attempts off a shared work queue. Both share the same retry
//! policy and the same `query_agents`/`wait_for_agents` phases.

pub mod queue;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::connection::{AgentConnection, State};
use crate::mirror::MirrorGroup;
use crate::poller::{MioPoller, Poller};
use crate::protocol::{ReplyParser, RequestBuilder};
use self::queue::WorkQueue;

#[derive(Clone)]
pub struct DispatchConfig {
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub max_packet_size: i32,
}

/// `retry_limit = abs(retry_count) * mirror_count`; a negative
/// `retry_count` is sign-magnitude for "force this many retries per
/// mirror" (spec §9 open question, resolved in DESIGN.md).
pub fn retry_limit(retry_count: i32, mirror_count: usize) -> u32 {
    retry_count.unsigned_abs() * mirror_count as u32
}

fn fresh_attempt(group: &MirrorGroup, mirror_index: usize) -> AgentConnection {
    AgentConnection::new(group.mirrors[mirror_index].clone(), mirror_index)
}

/// Runs one group to completion: connect, both phases, and re-dispatch
/// against the next mirror on RETRY while the retry budget allows,
/// sleeping `config.retry_delay` between rounds.
fn run_one_group<P: Poller>(poller: &mut P,
                             group: &MirrorGroup,
                             builder: &dyn RequestBuilder,
                             parser: &dyn ReplyParser,
                             config: &DispatchConfig)
                             -> AgentConnection {
    let limit = retry_limit(group.retry_count, group.len());
    let mut mirror_index = group.choose();
    let mut attempt = fresh_attempt(group, mirror_index);
    let mut tries = 0u32;

    loop {
        let _ = crate::driver::query_agents(poller, std::slice::from_mut(&mut attempt), builder, config.timeout);
        let _ = crate::driver::wait_for_agents(poller,
                                                std::slice::from_mut(&mut attempt),
                                                parser,
                                                config.max_packet_size,
                                                config.timeout);

        if attempt.state != State::Retry || tries >= limit {
            return attempt;
        }
        tries += 1;
        mirror_index = (mirror_index + 1) % group.len();
        thread::sleep(config.retry_delay);
        attempt = fresh_attempt(group, mirror_index);
    }
}

/// Single worker thread, multiplexing every group's current attempt over
/// one poller (T=1, spec §4.7 "Sequential").
pub fn run_sequential(groups: &[MirrorGroup],
                       builder: &dyn RequestBuilder,
                       parser: &dyn ReplyParser,
                       config: &DispatchConfig)
                       -> Vec<AgentConnection> {
    let mut poller = MioPoller::new().expect("poller init");
    let limits: Vec<u32> = groups.iter().map(|g| retry_limit(g.retry_count, g.len())).collect();
    let mut cursors: Vec<usize> = groups.iter().map(|g| g.choose()).collect();
    let mut tries: Vec<u32> = vec![0; groups.len()];
    let mut attempts: Vec<AgentConnection> = groups.iter()
        .zip(cursors.iter())
        .map(|(g, &idx)| fresh_attempt(g, idx))
        .collect();

    loop {
        let _ = crate::driver::query_agents(&mut poller, &mut attempts, builder, config.timeout);
        let _ = crate::driver::wait_for_agents(&mut poller,
                                                &mut attempts,
                                                parser,
                                                config.max_packet_size,
                                                config.timeout);

        let mut any_retry = false;
        for i in 0..attempts.len() {
            if attempts[i].state == State::Retry && tries[i] < limits[i] {
                tries[i] += 1;
                cursors[i] = (cursors[i] + 1) % groups[i].len();
                attempts[i] = fresh_attempt(&groups[i], cursors[i]);
                any_retry = true;
            }
        }
        if !any_retry {
            break;
        }
        thread::sleep(config.retry_delay);
    }
    attempts
}

/// Thread pool (T>1, spec §4.7 "Parallel"): a shared work queue of group
/// indices, each thread pulling the next one and driving it to
/// completion (including its own retries) on its own poller instance.
pub fn run_parallel(thread_count: usize,
                     groups: Arc<Vec<MirrorGroup>>,
                     builder: Arc<dyn RequestBuilder>,
                     parser: Arc<dyn ReplyParser>,
                     config: DispatchConfig)
                     -> Vec<AgentConnection> {
    let queue = Arc::new(WorkQueue::new());
    for i in 0..groups.len() {
        queue.push(i);
    }
    let results: Arc<Mutex<Vec<Option<AgentConnection>>>> =
        Arc::new(Mutex::new((0..groups.len()).map(|_| None).collect()));
    let agents_done = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(thread_count);
    for _ in 0..thread_count.max(1) {
        let groups = groups.clone();
        let queue = queue.clone();
        let results = results.clone();
        let builder = builder.clone();
        let parser = parser.clone();
        let config = config.clone();
        let agents_done = agents_done.clone();

        handles.push(thread::spawn(move || {
            let mut poller = MioPoller::new().expect("poller init");
            while let Some(idx) = queue.try_pop() {
                let attempt = run_one_group(&mut poller,
                                             &groups[idx],
                                             builder.as_ref(),
                                             parser.as_ref(),
                                             &config);
                results.lock().unwrap()[idx] = Some(attempt);
                agents_done.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        let _ = handle.join();
    }

    Arc::try_unwrap(results)
        .ok()
        .expect("all worker threads joined")
        .into_inner()
        .unwrap()
        .into_iter()
        .map(|slot| slot.expect("every queued index was processed"))
        .collect()
}
