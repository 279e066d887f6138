//! Agent identity: descriptors, permanent per-agent counters, and the
//! string grammar configured agents are parsed from.

pub mod desc;
pub mod parse;
pub mod stats;

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;

pub use self::desc::{AddressFamily, AgentDesc, AgentOptions, HaStrategy};
pub use self::parse::{configure_mirror_set, ParsedAgent};
pub use self::stats::{AgentStats, Outcome, OUTCOME_COUNT};

use crate::config::HostnameLookup;
use crate::dashboard::DashboardStorage;

/// Looks up `addr` via the system resolver, taking the first IPv4 result
/// (`sphGetAddress` in the original).
fn lookup_ipv4(addr: &str) -> Option<Ipv4Addr> {
    (addr, 0).to_socket_addrs().ok()?.find_map(|sa| match sa.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    })
}

/// Resolves a hostname fresh, for `HostnameLookup::EachAttempt` agents
/// re-resolving before every connection attempt.
pub fn resolve_each_attempt(addr: &str) -> Option<Ipv4Addr> {
    if let Ok(ip) = Ipv4Addr::from_str(addr) {
        return Some(ip);
    }
    lookup_ipv4(addr)
}

/// Resolves `addr` to a cached `Ipv4Addr`, or marks it for per-attempt
/// resolution. Literal IPv4 addresses always resolve once, regardless of
/// `lookup` (`ResolveAddress` in the original).
fn resolve_address(addr: &str, lookup: HostnameLookup) -> (Option<Ipv4Addr>, bool) {
    if let Ok(ip) = Ipv4Addr::from_str(addr) {
        return (Some(ip), false);
    }
    match lookup {
        HostnameLookup::Once => (lookup_ipv4(addr), false),
        HostnameLookup::EachAttempt => (None, true),
    }
}

/// Turns a `ParsedAgent` into a fully wired `AgentDesc`: resolves its
/// address and registers (or reuses) its `HostDashboard` and fresh
/// `AgentStats` block (`ValidateAndAddDashboard`).
pub fn validate_and_add_dashboard(parsed: ParsedAgent,
                                   lookup: HostnameLookup,
                                   storage: &DashboardStorage,
                                   karma_period_secs: u32,
                                   pool_capacity: usize)
                                   -> AgentDesc {
    let (resolved, needs_resolve) = match parsed.family {
        AddressFamily::Inet => resolve_address(&parsed.addr, lookup),
        AddressFamily::Unix => (None, false),
    };

    let url = match parsed.family {
        AddressFamily::Inet => format!("{}:{}", parsed.addr, parsed.port),
        AddressFamily::Unix => parsed.addr.clone(),
    };
    let dash = storage.get_or_insert(&url, karma_period_secs, pool_capacity);

    AgentDesc {
        family: parsed.family,
        addr: parsed.addr,
        resolved,
        port: parsed.port,
        needs_resolve,
        persistent: parsed.persistent,
        blackhole: parsed.blackhole,
        indexes: parsed.indexes,
        dash,
        stats: Arc::new(AgentStats::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_ip_resolves_without_needs_resolve() {
        let (resolved, needs) = resolve_address("127.0.0.1", HostnameLookup::EachAttempt);
        assert_eq!(resolved, Some(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(!needs);
    }

    #[test]
    fn hostname_each_attempt_defers_resolution() {
        let (resolved, needs) = resolve_address("searchd.internal", HostnameLookup::EachAttempt);
        assert!(resolved.is_none());
        assert!(needs);
    }

    #[test]
    fn hostname_once_resolves_via_system_resolver() {
        let (resolved, needs) = resolve_address("localhost", HostnameLookup::Once);
        assert!(resolved.is_some());
        assert!(!needs);
    }

    #[test]
    fn resolve_each_attempt_resolves_localhost() {
        assert!(resolve_each_attempt("localhost").is_some());
    }

    #[test]
    fn validate_and_add_dashboard_shares_dashboard_across_mirrors() {
        let storage = DashboardStorage::new();
        let a = ParsedAgent {
            family: AddressFamily::Inet,
            addr: "127.0.0.1".to_string(),
            port: 9312,
            persistent: false,
            blackhole: false,
            indexes: vec!["main".to_string()],
        };
        let b = a.clone();
        let desc_a = validate_and_add_dashboard(a, HostnameLookup::Once, &storage, 60, 0);
        let desc_b = validate_and_add_dashboard(b, HostnameLookup::Once, &storage, 60, 0);
        assert!(Arc::ptr_eq(&desc_a.dash, &desc_b.dash));
        assert!(!Arc::ptr_eq(&desc_a.stats, &desc_b.stats));
    }
}
