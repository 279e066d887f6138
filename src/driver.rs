//! The two-phase query driver (spec §4.6): Phase 1 drives every attempt
//! from UNUSED/CONNECTING through to QUERYED; Phase 2 waits for replies.
//! Both phases share one wall-clock deadline and one `Poller` instance,
//! never shared across worker threads (spec §5).

use std::time::{Duration, Instant};

use crate::agent::stats::Outcome;
use crate::connection::{AgentConnection, State};
use crate::poller::Poller;
use crate::protocol::{RequestBuilder, ReplyParser};

fn remaining(deadline: Instant) -> Duration {
    let now = Instant::now();
    if now >= deadline {
        Duration::from_millis(0)
    } else {
        deadline - now
    }
}

/// Drives every attempt not already past QUERYED through connect,
/// handshake, and request write (`RemoteQueryAgents`). Attempts still in
/// flight when the deadline passes fail with `eTimeoutsConnect`.
pub fn query_agents<P: Poller>(poller: &mut P,
                                attempts: &mut [AgentConnection],
                                builder: &dyn RequestBuilder,
                                timeout: Duration)
                                -> std::io::Result<()> {
    let deadline = Instant::now() + timeout;

    for (i, attempt) in attempts.iter_mut().enumerate() {
        if attempt.state == State::Unused || attempt.state == State::Retry {
            let request = builder.build(&attempt.desc.indexes);
            if let Err(e) = attempt.connect(request) {
                attempt.fail(Outcome::ConnectFailures, e.to_string());
                continue;
            }
        }
        if let Some(interest) = attempt.wanted_interest() {
            if let Some(sock) = attempt.socket() {
                let _ = poller.register(sock, i, interest);
            }
        }
    }

    loop {
        if attempts.iter()
            .all(|a| matches!(a.state, State::Queryed | State::Prereply | State::Retry)) {
            break;
        }

        let wait = remaining(deadline);
        if wait.as_millis() == 0 {
            timeout_unfinished(attempts);
            break;
        }

        let ready = poller.poll(Some(wait)).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
            })?;
        if ready.is_empty() && remaining(deadline).as_millis() == 0 {
            timeout_unfinished(attempts);
            break;
        }

        for (token, readiness) in ready {
            let attempt = &mut attempts[token];
            let prev_state = attempt.state;
            let outcome = if readiness.writable {
                attempt.on_writable()
            } else {
                Ok(false)
            }.and_then(|advanced| if !advanced && readiness.readable {
                attempt.on_readable_phase1()
            } else {
                Ok(advanced)
            });

            match outcome {
                Ok(_) => {
                    if attempt.state != prev_state {
                        if let Some(interest) = attempt.wanted_interest() {
                            if let Some(sock) = attempt.socket() {
                                let _ = poller.reregister(sock, token, interest);
                            }
                        }
                    }
                }
                Err(e) => attempt.fail(Outcome::ConnectFailures, e.to_string()),
            }
        }
    }

    Ok(())
}

fn timeout_unfinished(attempts: &mut [AgentConnection]) {
    for attempt in attempts.iter_mut() {
        if !matches!(attempt.state, State::Queryed | State::Prereply | State::Retry) {
            attempt.fail(Outcome::TimeoutsConnect, "connect/handshake deadline exceeded".to_string());
        }
    }
}

/// Waits for replies on every attempt in QUERYED/PREREPLY/REPLY
/// (`RemoteWaitForAgents`). Attempts still incomplete at the deadline fail
/// with `eTimeoutsQuery`.
pub fn wait_for_agents<P: Poller>(poller: &mut P,
                                   attempts: &mut [AgentConnection],
                                   parser: &dyn ReplyParser,
                                   max_packet_size: i32,
                                   timeout: Duration)
                                   -> std::io::Result<()> {
    let deadline = Instant::now() + timeout;

    for (i, attempt) in attempts.iter_mut().enumerate() {
        attempt.resume_from_prereply();
        if matches!(attempt.state, State::Queryed | State::Reply) {
            if let Some(sock) = attempt.socket() {
                let _ = poller.register(sock, i, crate::poller::Interest::readable());
            }
        }
    }

    loop {
        if attempts.iter().all(|a| a.success || a.state == State::Retry) {
            break;
        }

        let wait = remaining(deadline);
        if wait.as_millis() == 0 {
            timeout_unanswered(attempts);
            break;
        }

        let ready = poller.poll(Some(wait)).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
            })?;
        if ready.is_empty() && remaining(deadline).as_millis() == 0 {
            timeout_unanswered(attempts);
            break;
        }

        for (token, _readiness) in ready {
            let attempt = &mut attempts[token];
            match attempt.on_readable_phase2(parser, max_packet_size) {
                Ok(_) => {}
                Err(e) => attempt.fail(Outcome::NetworkErrors, e.to_string()),
            }
        }
    }

    Ok(())
}

fn timeout_unanswered(attempts: &mut [AgentConnection]) {
    for attempt in attempts.iter_mut() {
        if !attempt.success && attempt.state != State::Retry {
            attempt.fail(Outcome::TimeoutsQuery, "reply deadline exceeded".to_string());
        }
    }
}
