extern crate agent_dispatch;
extern crate env_logger;

mod mocks;

use std::net::TcpListener;
use std::time::Duration;

use agent_dispatch::agent;
use agent_dispatch::agent::desc::{AddressFamily, HaStrategy};
use agent_dispatch::agent::parse::ParsedAgent;
use agent_dispatch::agent::stats::Outcome;
use agent_dispatch::config::{GlobalConfig, HostnameLookup};
use agent_dispatch::dashboard::DashboardStorage;
use agent_dispatch::dispatch::Dispatcher;
use agent_dispatch::mirror::MirrorGroup;
use agent_dispatch::protocol::{ParsedReply, ReplyParser, RequestBuilder};
use agent_dispatch::worker;
use agent_dispatch::worker::DispatchConfig;

use mocks::{MockAgent, MockBehavior};

struct EmptyRequest;
impl RequestBuilder for EmptyRequest {
    fn build(&self, _indexes: &[String]) -> Vec<u8> {
        Vec::new()
    }
}

struct AcceptAnyReply;
impl ReplyParser for AcceptAnyReply {
    fn parse(&self, body: &[u8]) -> ParsedReply {
        ParsedReply { consumed: body.len(), ok: true, has_warning: false }
    }
}

fn mirror_desc(storage: &DashboardStorage, addr: std::net::SocketAddr) -> agent_dispatch::agent::AgentDesc {
    let parsed = ParsedAgent {
        family: AddressFamily::Inet,
        addr: addr.ip().to_string(),
        port: addr.port(),
        persistent: false,
        blackhole: false,
        indexes: vec!["main".to_string()],
    };
    agent::validate_and_add_dashboard(parsed, HostnameLookup::Once, storage, 60, 0)
}

/// An address nothing is listening on: binding then immediately dropping
/// the listener frees the port while leaving the OS refusing new
/// connects to it right away.
fn refused_addr() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[test]
fn timeout_correctness_fails_with_timeouts_query() {
    drop(env_logger::init());
    let storage = DashboardStorage::new();
    let mock = MockAgent::spawn(|| MockBehavior::Silent);
    let mirror = mirror_desc(&storage, mock.addr);
    let stats = mirror.stats.clone();
    let group = MirrorGroup::new(vec![mirror], HaStrategy::Random, 60, 0, 1);

    let dispatcher = Dispatcher::new(GlobalConfig::default());
    let results = dispatcher.dispatch(&[group],
                                       &EmptyRequest,
                                       &AcceptAnyReply,
                                       Duration::from_millis(150),
                                       Duration::from_millis(10));

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(stats.get(Outcome::TimeoutsQuery), 1);
}

#[test]
fn retry_against_mirror_succeeds_on_second() {
    let storage = DashboardStorage::new();
    let dead_addr = refused_addr();
    let mock = MockAgent::spawn(|| MockBehavior::ReplyOk(Vec::new()));

    let dead = mirror_desc(&storage, dead_addr);
    let alive = mirror_desc(&storage, mock.addr);
    let dead_stats = dead.stats.clone();
    let alive_stats = alive.stats.clone();

    let group = MirrorGroup::new(vec![dead, alive], HaStrategy::RoundRobin, 60, 1, 2);
    let config = DispatchConfig {
        timeout: Duration::from_millis(300),
        retry_delay: Duration::from_millis(5),
        max_packet_size: 8 * 1024 * 1024,
    };
    let results = worker::run_sequential(&[group], &EmptyRequest, &AcceptAnyReply, &config);

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(dead_stats.get(Outcome::ConnectFailures), 1);
    assert_eq!(alive_stats.get(Outcome::NetworkNonCritical), 1);
}

#[test]
fn framing_rejection_on_oversize_length() {
    let storage = DashboardStorage::new();
    let mock = MockAgent::spawn(|| MockBehavior::OversizeLength);
    let mirror = mirror_desc(&storage, mock.addr);
    let stats = mirror.stats.clone();
    let group = MirrorGroup::new(vec![mirror], HaStrategy::Random, 60, 0, 1);

    let dispatcher = Dispatcher::new(GlobalConfig::default());
    let results = dispatcher.dispatch(&[group],
                                       &EmptyRequest,
                                       &AcceptAnyReply,
                                       Duration::from_millis(300),
                                       Duration::from_millis(10));

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(stats.get(Outcome::WrongReplies), 1);
}

#[test]
fn version_workaround_accepts_host_order_handshake() {
    use agent_dispatch::protocol::{decode_handshake_version, PROTOCOL_VERSION};

    let mut buf = [0u8; 4];
    buf.copy_from_slice(&PROTOCOL_VERSION.to_ne_bytes());
    assert_eq!(decode_handshake_version(buf), PROTOCOL_VERSION);
}
