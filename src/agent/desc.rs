//! Identity of one remote agent endpoint (spec §3 "Agent descriptor").

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

use crate::agent::stats::AgentStats;
use crate::dashboard::HostDashboard;

/// Address family of an agent endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Unix,
}

/// Mirror-selection strategy for a group with more than one replica
/// (spec §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaStrategy {
    Random,
    RoundRobin,
    AvoidDead,
    AvoidErrors,
}

impl Default for HaStrategy {
    fn default() -> HaStrategy {
        HaStrategy::Random
    }
}

/// Identity of one remote endpoint. Cheaply cloned per dispatch (the
/// original's `AgentDesc_c::CloneTo`): every attempt gets its own owned
/// snapshot while sharing the dashboard and permanent stats block.
#[derive(Clone)]
pub struct AgentDesc {
    pub family: AddressFamily,
    /// Hostname or filesystem path, depending on `family`.
    pub addr: String,
    /// Resolved IPv4 address, cached when the hostname is a literal IP or
    /// `needs_resolve` is false. Unused for `Unix`.
    pub resolved: Option<Ipv4Addr>,
    pub port: u16,
    /// Re-resolve `addr` before each connection attempt rather than using
    /// the cached `resolved` value.
    pub needs_resolve: bool,
    pub persistent: bool,
    /// Fire-and-forget: dispatched to but not awaited.
    pub blackhole: bool,
    /// Per-mirror index name(s), comma-joined (spec §6 grammar). Routing on
    /// this is out of scope; only parsing/validating it is (SPEC_FULL §3).
    pub indexes: Vec<String>,
    pub dash: Arc<HostDashboard>,
    pub stats: Arc<AgentStats>,
}

impl AgentDesc {
    /// Canonical intern key for the dashboard storage: `"host:port"` for
    /// inet agents, the bare path for unix-socket agents.
    pub fn url(&self) -> String {
        match self.family {
            AddressFamily::Inet => format!("{}:{}", self.addr, self.port),
            AddressFamily::Unix => self.addr.clone(),
        }
    }
}

/// Per-group options parsed from the `[...]` section of an agent spec
/// string (spec §6).
#[derive(Clone, Debug, Default)]
pub struct AgentOptions {
    pub persistent: bool,
    pub strategy: HaStrategy,
    pub blackhole: bool,
    /// Signed: negative means "force this many retries per mirror"
    /// (spec §9 open question, resolved in DESIGN.md).
    pub retry_count: i32,
    pub retry_count_multiplier: i32,
}
