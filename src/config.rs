//! Process-wide tunables. Loaded the same way the teacher's `app::config`
//! loads `AppConfig`: sniff a leading `{` for JSON, otherwise parse as YAML.

use serde_json;
use serde_yaml;
use std::io;

/// Governs whether a hostname is resolved once (at agent-spec parse time)
/// or re-resolved before every connection attempt.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HostnameLookup {
    Once,
    EachAttempt,
}

impl Default for HostnameLookup {
    fn default() -> HostnameLookup {
        HostnameLookup::Once
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Interval, in milliseconds, between health pings of otherwise-idle
    /// mirrors. 0 disables pinging. Mirrors `g_iPingInterval`.
    #[serde(default = "defaults::ping_interval_ms")]
    pub ping_interval_ms: i64,

    /// Width, in seconds, of a dashboard ring bucket. Mirrors
    /// `g_uHAPeriodKarma`.
    #[serde(default = "defaults::karma_period_secs")]
    pub karma_period_secs: u32,

    /// Capacity of each host's persistent-connection pool. Mirrors
    /// `g_iPersistentPoolSize`.
    #[serde(default = "defaults::persistent_pool_capacity")]
    pub persistent_pool_capacity: usize,

    /// Maximum accepted reply body length, in bytes. Mirrors
    /// `g_iMaxPacketSize`.
    #[serde(default = "defaults::max_packet_size")]
    pub max_packet_size: i32,

    /// Resolve-once vs resolve-each-attempt for plain hostnames.
    #[serde(default)]
    pub hostname_lookup: HostnameLookup,
}

impl Default for GlobalConfig {
    fn default() -> GlobalConfig {
        GlobalConfig {
            ping_interval_ms: defaults::ping_interval_ms(),
            karma_period_secs: defaults::karma_period_secs(),
            persistent_pool_capacity: defaults::persistent_pool_capacity(),
            max_packet_size: defaults::max_packet_size(),
            hostname_lookup: HostnameLookup::default(),
        }
    }
}

mod defaults {
    pub fn ping_interval_ms() -> i64 {
        1000
    }
    pub fn karma_period_secs() -> u32 {
        60
    }
    pub fn persistent_pool_capacity() -> usize {
        0
    }
    pub fn max_packet_size() -> i32 {
        8 * 1024 * 1024
    }
}

/// Parses a `GlobalConfig` from either JSON or YAML text, detected by
/// whether the (left-trimmed) text starts with `{`.
pub fn from_str(txt: &str) -> io::Result<GlobalConfig> {
    let trimmed = txt.trim_left();
    if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    } else {
        serde_yaml::from_str(trimmed).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
