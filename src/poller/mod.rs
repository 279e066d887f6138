//! Readiness poller (spec §4.1). A `Poller` trait plus one production
//! backend built on `mio` (the same release line the teacher's
//! `tokio-core` dependency wraps internally) and a `NullPoller` dummy for
//! exercising the connection state machine without real sockets.

use std::io;
use std::time::Duration;

use mio::{Events, Poll, PollOpt, Ready, Token as MioToken};

use crate::error::{Error, Result};

pub type Token = usize;

/// Direction(s) a registration cares about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub fn readable() -> Interest {
        Interest { readable: true, writable: false }
    }

    pub fn writable() -> Interest {
        Interest { readable: false, writable: true }
    }

    pub fn both() -> Interest {
        Interest { readable: true, writable: true }
    }

    fn to_ready(self) -> Ready {
        let mut r = Ready::empty();
        if self.readable {
            r |= Ready::readable();
        }
        if self.writable {
            r |= Ready::writable();
        }
        r
    }
}

/// Bitset of what fired for one fd (spec §4.1: "read, write, hangup,
/// error, priority"). `priority` has no portable mio 0.6 equivalent and is
/// always false here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
    pub error: bool,
    pub priority: bool,
}

/// Uniform interface the driver polls through; backend choice (mio here,
/// a no-op dummy for tests) is invisible past this trait.
pub trait Poller {
    fn register<E: mio::Evented>(&mut self, handle: &E, token: Token, interest: Interest) -> Result<()>;
    fn reregister<E: mio::Evented>(&mut self,
                                    handle: &E,
                                    token: Token,
                                    interest: Interest)
                                    -> Result<()>;
    fn deregister<E: mio::Evented>(&mut self, handle: &E) -> Result<()>;

    /// Waits up to `timeout` (`None` blocks indefinitely), then returns
    /// every `(token, Readiness)` pair that fired. EINTR is retried
    /// silently; an empty result means a clean timeout.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(Token, Readiness)>>;
}

#[cfg(unix)]
fn readiness_from(r: Ready) -> Readiness {
    let u = mio::unix::UnixReady::from(r);
    Readiness {
        readable: r.is_readable(),
        writable: r.is_writable(),
        hangup: u.is_hup(),
        error: u.is_error(),
        priority: false,
    }
}

#[cfg(not(unix))]
fn readiness_from(r: Ready) -> Readiness {
    Readiness {
        readable: r.is_readable(),
        writable: r.is_writable(),
        hangup: false,
        error: false,
        priority: false,
    }
}

/// `mio`-backed poller: a thin, direct wrapper (edge-triggered
/// registrations) since the dispatcher is thread-per-worker and blocks
/// between polls rather than driving a shared reactor.
pub struct MioPoller {
    poll: Poll,
    events: Events,
}

impl MioPoller {
    pub fn new() -> Result<MioPoller> {
        Ok(MioPoller {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
        })
    }
}

impl Poller for MioPoller {
    fn register<E: mio::Evented>(&mut self, handle: &E, token: Token, interest: Interest) -> Result<()> {
        self.poll
            .register(handle, MioToken(token), interest.to_ready(), PollOpt::edge())
            .map_err(Error::from)
    }

    fn reregister<E: mio::Evented>(&mut self,
                                    handle: &E,
                                    token: Token,
                                    interest: Interest)
                                    -> Result<()> {
        self.poll
            .reregister(handle, MioToken(token), interest.to_ready(), PollOpt::edge())
            .map_err(Error::from)
    }

    fn deregister<E: mio::Evented>(&mut self, handle: &E) -> Result<()> {
        self.poll.deregister(handle).map_err(Error::from)
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(Token, Readiness)>> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(_) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from(e)),
            }
        }
        Ok(self.events
            .iter()
            .map(|ev| (ev.token().0, readiness_from(ev.readiness())))
            .collect())
    }
}

/// No-op backend: registrations are remembered and reported ready on every
/// `poll`, so the connection state machine can be driven deterministically
/// (real I/O readiness is then discovered the ordinary way, via `WouldBlock`)
/// without needing an OS-backed poller at all.
#[derive(Default)]
pub struct NullPoller {
    registered: Vec<(Token, Interest)>,
}

impl NullPoller {
    pub fn new() -> NullPoller {
        NullPoller::default()
    }
}

impl Poller for NullPoller {
    fn register<E: mio::Evented>(&mut self, _handle: &E, token: Token, interest: Interest) -> Result<()> {
        self.registered.push((token, interest));
        Ok(())
    }

    fn reregister<E: mio::Evented>(&mut self,
                                    _handle: &E,
                                    token: Token,
                                    interest: Interest)
                                    -> Result<()> {
        if let Some(slot) = self.registered.iter_mut().find(|(t, _)| *t == token) {
            slot.1 = interest;
        }
        Ok(())
    }

    fn deregister<E: mio::Evented>(&mut self, _handle: &E) -> Result<()> {
        Ok(())
    }

    fn poll(&mut self, _timeout: Option<Duration>) -> Result<Vec<(Token, Readiness)>> {
        Ok(self.registered
            .iter()
            .map(|&(t, i)| {
                (t,
                 Readiness {
                    readable: i.readable,
                    writable: i.writable,
                    hangup: false,
                    error: false,
                    priority: false,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpListener;

    #[test]
    fn null_poller_reports_every_registration_ready() {
        let mut p = NullPoller::new();
        let listener = TcpListener::bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
        p.register(&listener, 1, Interest::readable()).unwrap();
        p.register(&listener, 2, Interest::both()).unwrap();
        let ready = p.poll(Some(Duration::from_millis(0))).unwrap();
        assert_eq!(ready.len(), 2);
        assert!(ready.iter().any(|&(t, r)| t == 1 && r.readable && !r.writable));
        assert!(ready.iter().any(|&(t, r)| t == 2 && r.readable && r.writable));
    }

    #[test]
    fn null_poller_reregister_updates_interest() {
        let mut p = NullPoller::new();
        let listener = TcpListener::bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
        p.register(&listener, 1, Interest::readable()).unwrap();
        p.reregister(&listener, 1, Interest::writable()).unwrap();
        let ready = p.poll(None).unwrap();
        assert_eq!(ready, vec![(1,
                                 Readiness {
                                     readable: false,
                                     writable: true,
                                     hangup: false,
                                     error: false,
                                     priority: false,
                                 })]);
    }

    #[test]
    fn mio_poller_reports_listener_readiness_on_connect() {
        let mut p = MioPoller::new().unwrap();
        let listener = TcpListener::bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        p.register(&listener, 7, Interest::readable()).unwrap();

        let _client = mio::net::TcpStream::connect(&addr).unwrap();
        let ready = p.poll(Some(Duration::from_millis(500))).unwrap();
        assert!(ready.iter().any(|&(t, r)| t == 7 && r.readable));
    }
}
