//! Per-attempt I/O state machine (spec §4.5, `AgentConn_t` in the
//! original). One `AgentConnection` is an ephemeral, single-dispatch
//! object: an owned snapshot of an `AgentDesc` plus whatever socket,
//! buffers, and bookkeeping its current attempt needs.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use mio::net::TcpStream;

use crate::agent::desc::AgentDesc;
use crate::agent::stats::Outcome;
use crate::protocol::{self, ReplyParser, Status};

/// Protocol states an attempt moves through (spec §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Unused,
    Connecting,
    Handshake,
    Established,
    Queryed,
    Prereply,
    Reply,
    Retry,
}

#[cfg(unix)]
fn mio_to_std(sock: TcpStream) -> std::net::TcpStream {
    use std::os::unix::io::{FromRawFd, IntoRawFd};
    unsafe { std::net::TcpStream::from_raw_fd(sock.into_raw_fd()) }
}

fn now_us() -> i64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    d.as_secs() as i64 * 1_000_000 + d.subsec_micros() as i64
}

/// One dispatch attempt against one mirror. Holds the socket (owned or
/// borrowed from the persistent pool) and every buffer its current phase
/// needs; nothing here is shared across attempts.
pub struct AgentConnection {
    pub desc: AgentDesc,
    pub mirror_index: usize,
    pub state: State,
    socket: Option<TcpStream>,
    from_pool: bool,
    fresh_persistent: bool,

    handshake_out: Vec<u8>,
    handshake_written: usize,
    handshake_in: [u8; 4],
    handshake_read: usize,

    request_out: Vec<u8>,
    request_written: usize,

    header_in: [u8; protocol::REPLY_HEADER_LEN],
    header_read: usize,
    header: Option<protocol::ReplyHeader>,
    body: Vec<u8>,
    body_read: usize,

    start_us: i64,
    query_start_us: i64,

    pub retries: u32,
    pub success: bool,
    pub fail_message: Option<String>,
}

impl AgentConnection {
    pub fn new(desc: AgentDesc, mirror_index: usize) -> AgentConnection {
        AgentConnection {
            desc,
            mirror_index,
            state: State::Unused,
            socket: None,
            from_pool: false,
            fresh_persistent: false,
            handshake_out: Vec::new(),
            handshake_written: 0,
            handshake_in: [0u8; 4],
            handshake_read: 0,
            request_out: Vec::new(),
            request_written: 0,
            header_in: [0u8; protocol::REPLY_HEADER_LEN],
            header_read: 0,
            header: None,
            body: Vec::new(),
            body_read: 0,
            start_us: 0,
            query_start_us: 0,
            retries: 0,
            success: false,
            fail_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state == State::Retry
    }

    fn socket_addr(&self) -> io::Result<SocketAddr> {
        let ip = if self.desc.needs_resolve {
            crate::agent::resolve_each_attempt(&self.desc.addr)
        } else {
            self.desc.resolved
        };
        let ip = ip.ok_or_else(|| io::Error::new(io::ErrorKind::Other, "address not resolved"))?;
        Ok(SocketAddr::new(ip.into(), self.desc.port))
    }

    /// Starts a new attempt: rents a pooled socket if one is available, or
    /// issues a fresh non-blocking connect. `request` is the fully built
    /// request body for this attempt's index list.
    pub fn connect(&mut self, request: Vec<u8>) -> io::Result<()> {
        self.request_out = request;
        self.start_us = now_us();

        let mut pooled = None;
        if self.desc.persistent {
            if let Some(pool) = self.desc.dash.pool() {
                if let Ok(sock) = pool.rent() {
                    sock.set_nonblocking(true)?;
                    pooled = Some(TcpStream::from_stream(sock)?);
                }
            }
        }

        if let Some(sock) = pooled {
            self.socket = Some(sock);
            self.from_pool = true;
            self.fresh_persistent = false;
            self.state = State::Established;
        } else {
            let addr = self.socket_addr()?;
            self.socket = Some(TcpStream::connect(&addr)?);
            self.from_pool = false;
            self.fresh_persistent = self.desc.persistent;
            self.handshake_out = protocol::encode_handshake().to_vec();
            if self.fresh_persistent {
                self.handshake_out.extend_from_slice(&protocol::encode_persist_prelude());
            }
            self.state = State::Connecting;
        }
        Ok(())
    }

    /// Direction the poller should watch for in the current state
    /// (spec §4.6 Phase 1: "write-readiness if CONNECTING or ESTABLISHED,
    /// read-readiness if HANDSHAKE").
    pub fn wanted_interest(&self) -> Option<crate::poller::Interest> {
        use crate::poller::Interest;
        match self.state {
            State::Connecting | State::Established => Some(Interest::writable()),
            State::Handshake => Some(Interest::readable()),
            State::Queryed | State::Prereply | State::Reply => Some(Interest::readable()),
            State::Unused | State::Retry => None,
        }
    }

    pub fn socket(&self) -> Option<&TcpStream> {
        self.socket.as_ref()
    }

    /// Drives a writable event. Returns `Ok(true)` if the state advanced.
    pub fn on_writable(&mut self) -> io::Result<bool> {
        match self.state {
            State::Connecting => {
                if let Some(e) = self.socket.as_ref().unwrap().take_error()? {
                    return Err(e);
                }
                let elapsed_ms = ((now_us() - self.start_us) / 1000).max(0) as u64;
                self.desc.dash.track_connect(elapsed_ms);
                self.desc.stats.track_connect(elapsed_ms);
                self.flush_handshake()
            }
            State::Handshake => self.flush_handshake(),
            State::Established => self.flush_request(),
            _ => Ok(false),
        }
    }

    fn flush_handshake(&mut self) -> io::Result<bool> {
        loop {
            if self.handshake_written == self.handshake_out.len() {
                self.state = State::Handshake;
                return Ok(true);
            }
            let sock = self.socket.as_mut().unwrap();
            match sock.write(&self.handshake_out[self.handshake_written..]) {
                Ok(0) => {
                    self.fail(Outcome::UnexpectedClose, "peer closed during handshake".to_string());
                    return Ok(true);
                }
                Ok(n) => self.handshake_written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    fn flush_request(&mut self) -> io::Result<bool> {
        loop {
            if self.request_written == self.request_out.len() {
                self.state = State::Queryed;
                self.query_start_us = now_us();
                return Ok(true);
            }
            let sock = self.socket.as_mut().unwrap();
            match sock.write(&self.request_out[self.request_written..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
                                               "peer closed during request write"))
                }
                Ok(n) => self.request_written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    /// Drives a readable event during Phase 1 (handshake) or as the early
    /// "peer already answered" signal (QUERYED → PREREPLY).
    pub fn on_readable_phase1(&mut self) -> io::Result<bool> {
        match self.state {
            State::Handshake => self.read_handshake(),
            State::Queryed => {
                self.state = State::Prereply;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Phase 1 → Phase 2 handoff: an attempt parked in PREREPLY resumes
    /// normal QUERYED handling once the driver starts waiting for replies.
    pub fn resume_from_prereply(&mut self) {
        if self.state == State::Prereply {
            self.state = State::Queryed;
        }
    }

    fn read_handshake(&mut self) -> io::Result<bool> {
        loop {
            if self.handshake_read == self.handshake_in.len() {
                let version = protocol::decode_handshake_version(self.handshake_in);
                if !protocol::is_valid_handshake_version(version) {
                    self.fail(Outcome::WrongReplies,
                              format!("unexpected protocol version {}", version));
                    return Ok(true);
                }
                self.state = State::Established;
                return Ok(true);
            }
            let sock = self.socket.as_mut().unwrap();
            match sock.read(&mut self.handshake_in[self.handshake_read..]) {
                Ok(0) => {
                    self.fail(Outcome::UnexpectedClose, "peer closed during handshake".to_string());
                    return Ok(true);
                }
                Ok(n) => self.handshake_read += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    /// Drives a readable event during Phase 2 (header, then body).
    pub fn on_readable_phase2(&mut self,
                               parser: &dyn ReplyParser,
                               max_packet_size: i32)
                               -> io::Result<bool> {
        if self.state == State::Queryed || self.state == State::Prereply {
            if !self.read_header(max_packet_size)? {
                return Ok(false);
            }
        }
        if self.state == State::Reply {
            return self.read_body(parser);
        }
        Ok(false)
    }

    fn read_header(&mut self, max_packet_size: i32) -> io::Result<bool> {
        loop {
            if self.header_read == self.header_in.len() {
                match protocol::parse_reply_header(&self.header_in, max_packet_size) {
                    Ok(header) => {
                        self.body = vec![0u8; header.length as usize];
                        self.body_read = 0;
                        self.header = Some(header);
                        self.state = State::Reply;
                    }
                    Err(msg) => self.fail(Outcome::WrongReplies, msg),
                }
                return Ok(true);
            }
            let sock = self.socket.as_mut().unwrap();
            match sock.read(&mut self.header_in[self.header_read..]) {
                Ok(0) => {
                    self.fail(Outcome::WrongReplies, "peer closed before sending reply header".to_string());
                    return Ok(true);
                }
                Ok(n) => self.header_read += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    fn read_body(&mut self, parser: &dyn ReplyParser) -> io::Result<bool> {
        loop {
            if self.body_read == self.body.len() {
                return self.finish_reply(parser);
            }
            let sock = self.socket.as_mut().unwrap();
            match sock.read(&mut self.body[self.body_read..]) {
                Ok(0) => {
                    self.fail(Outcome::WrongReplies, "peer closed before completing reply body".to_string());
                    return Ok(true);
                }
                Ok(n) => self.body_read += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    fn finish_reply(&mut self, parser: &dyn ReplyParser) -> io::Result<bool> {
        let header = self.header.expect("body complete implies header parsed");
        let parsed = parser.parse(&self.body);
        let malformed = !parsed.ok || parsed.consumed < self.body.len();

        let outcome = match header.status {
            Status::Retry => {
                self.bill(Outcome::NetworkErrors, false);
                self.fail_message = Some("peer returned RETRY".to_string());
                self.state = State::Retry;
                self.close(true);
                return Ok(true);
            }
            Status::Error => {
                self.bill(Outcome::NetworkErrors, false);
                self.fail_message = Some("peer returned ERROR".to_string());
                self.state = State::Retry;
                self.close(true);
                return Ok(true);
            }
            _ if malformed => Outcome::WrongReplies,
            Status::Warning if parsed.has_warning => Outcome::NetworkCritical,
            Status::Warning => Outcome::NetworkNonCritical,
            Status::Ok => Outcome::NetworkNonCritical,
        };

        if outcome == Outcome::WrongReplies {
            self.bill(outcome, false);
            self.fail_message = Some("reply parser rejected body".to_string());
            self.state = State::Retry;
            self.close(true);
            return Ok(true);
        }

        self.bill(outcome, false);
        self.success = true;
        self.close(false);
        Ok(true)
    }

    /// Transitions to RETRY, closes the socket, records the failure
    /// message, and bills the outcome (`Fail`/`agent_stats_inc`).
    pub fn fail(&mut self, outcome: Outcome, msg: String) {
        self.bill(outcome, false);
        self.fail_message = Some(msg);
        self.state = State::Retry;
        self.close(true);
    }

    fn bill(&self, outcome: Outcome, is_ping: bool) {
        let end_us = now_us();
        self.desc.dash.bill(outcome, is_ping, self.query_start_us.max(self.start_us), end_us);
        self.desc.stats.incr(outcome);
        if !is_ping {
            self.desc.stats.add_total_msecs(((end_us - self.start_us) / 1000).max(0) as u64);
        }
    }

    /// Closes the socket. Persistent, successfully-handshaken sockets are
    /// returned to the pool unless `force_close` (spec §4.5 "Close
    /// policy"); everything else is simply dropped.
    fn close(&mut self, force_close: bool) {
        if let Some(sock) = self.socket.take() {
            let returnable = self.desc.persistent && !force_close &&
                              (self.from_pool || self.state != State::Retry);
            if returnable {
                if let Some(pool) = self.desc.dash.pool() {
                    pool.return_socket(mio_to_std(sock));
                }
            }
        }
    }
}
