//! Agent spec string grammar (spec §6, §8 `T_ParseAddressPort`/agent-list
//! parsing tests). Grounded on `searchdha.cpp`'s `ParseAddressPort`,
//! `ParseIndexList`, `ParseOptions`, and `ConfigureMirrorSet`.

use crate::agent::desc::{AddressFamily, AgentOptions, HaStrategy};

/// IANA-assigned default port for the search-daemon wire protocol.
pub const DEFAULT_PORT: u16 = 9312;

/// `sockaddr_un.sun_path` capacity on Linux; used only to bound how long a
/// configured UNIX socket path may be.
const UNIX_PATH_MAX: usize = 108;

/// A single parsed mirror, before address resolution and dashboard
/// registration (spec §3 calls the post-registration form `AgentDesc`).
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedAgent {
    pub family: AddressFamily,
    pub addr: String,
    pub port: u16,
    pub persistent: bool,
    pub blackhole: bool,
    pub indexes: Vec<String>,
}

fn is_host_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_'
}

fn is_path_char(b: u8) -> bool {
    is_host_char(b) || b == b'/'
}

/// Parses one `host[:port]` or `/unix/path` token from the head of
/// `input`. Returns the parsed `(family, addr, port)`, an optional
/// non-fatal warning, and the unconsumed remainder of `input`.
pub fn parse_address_port(input: &str)
                           -> Result<((AddressFamily, String, u16), Option<String>, &str), String> {
    let bytes = input.as_bytes();
    if bytes.is_empty() {
        return Err("host name or path expected".to_string());
    }

    if bytes[0] == b'/' {
        let mut i = 0;
        while i < bytes.len() && is_path_char(bytes[i]) {
            i += 1;
        }
        if i == 0 {
            return Err("host name or path expected".to_string());
        }
        let addr = &input[..i];
        if addr.len() + 1 > UNIX_PATH_MAX {
            return Err("UNIX socket path is too long".to_string());
        }
        return Ok(((AddressFamily::Unix, addr.to_string(), 0), None, &input[i..]));
    }

    let mut i = 0;
    while i < bytes.len() && is_host_char(bytes[i]) {
        i += 1;
    }
    if i == 0 {
        return Err("host name or path expected".to_string());
    }
    let addr = input[..i].to_string();

    if bytes.get(i) != Some(&b':') {
        let warn = format!("colon and portnum expected before '{}' - using default port {}",
                            &input[i..],
                            DEFAULT_PORT);
        return Ok(((AddressFamily::Inet, addr, DEFAULT_PORT), Some(warn), &input[i..]));
    }

    let digits_start = i + 1;
    let mut j = digits_start;
    while j < bytes.len() && bytes[j].is_ascii_digit() {
        j += 1;
    }
    if j == digits_start {
        let warn = format!("portnum expected before '{}' - using default port {}",
                            &input[j..],
                            DEFAULT_PORT);
        // Step back to the ':' so the caller sees it as unconsumed, as the
        // original does.
        return Ok(((AddressFamily::Inet, addr, DEFAULT_PORT), Some(warn), &input[i..]));
    }

    let port: u32 = input[digits_start..j].parse().unwrap();
    if port == 0 || port > 65535 {
        return Err(format!("invalid port number near '{}'", &input[j..]));
    }

    Ok(((AddressFamily::Inet, addr, port as u16), None, &input[j..]))
}

/// Splits a comma-separated index-name list, skipping stray delimiters
/// and whitespace (`ParseIndexList`).
pub fn parse_index_list(input: &str) -> Vec<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && !is_index_char(bytes[i]) {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let start = i;
        while i < bytes.len() && is_index_char(bytes[i]) {
            i += 1;
        }
        out.push(input[start..i].to_string());
    }
    out
}

fn is_index_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn parse_strategy(name: &str) -> Option<HaStrategy> {
    match name {
        "random" => Some(HaStrategy::Random),
        "roundrobin" => Some(HaStrategy::RoundRobin),
        "nodeads" => Some(HaStrategy::AvoidDead),
        "noerrors" => Some(HaStrategy::AvoidErrors),
        _ => None,
    }
}

/// Parses the `[option=value(,option=value)*]` section of an agent spec
/// (`ParseOptions`).
pub fn parse_options(input: &str) -> Result<AgentOptions, String> {
    let mut opts = AgentOptions::default();
    for raw in input.split(',') {
        if raw.is_empty() {
            continue;
        }
        let mut parts = raw.splitn(2, '=');
        let name = parts.next().unwrap_or("").trim().to_lowercase();
        let value = match parts.next() {
            Some(v) => v.trim().to_lowercase(),
            None => {
                return Err(format!("option {} error: option and value must be =-separated pair",
                                    raw))
            }
        };

        match name.as_str() {
            "conn" if value == "pconn" || value == "persistent" => opts.persistent = true,
            "ha_strategy" => {
                match parse_strategy(&value) {
                    Some(s) => opts.strategy = s,
                    None => return Err(format!("unknown agent option '{}'", raw)),
                }
            }
            "blackhole" => opts.blackhole = value.parse::<i32>().unwrap_or(0) != 0,
            "retry_count" => {
                opts.retry_count = value.parse()
                    .map_err(|_| format!("unknown agent option '{}'", raw))?;
                opts.retry_count_multiplier = 1;
            }
            _ => return Err(format!("unknown agent option '{}'", raw)),
        }
    }
    Ok(opts)
}

/// Parses a full agent spec string into its mirror set and options
/// (`ConfigureMirrorSet`). `default_index` backfills any mirror whose
/// trailing `:index[,index]*` is omitted, cascading backward through the
/// mirror list exactly as the original does.
pub fn configure_mirror_set(spec: &str,
                             default_index: &str)
                             -> Result<(Vec<ParsedAgent>, AgentOptions), String> {
    let bracket_parts: Vec<&str> = spec.splitn(3, |c| c == '[' || c == ']')
        .filter(|s| !s.is_empty())
        .collect();
    if bracket_parts.is_empty() || spec.starts_with('[') {
        return Err("one or more hosts/sockets expected before [".to_string());
    }
    if bracket_parts.len() > 2 {
        return Err("wrong syntax: expected one or more hosts/sockets, then m.b. []-enclosed \
                     options"
            .to_string());
    }

    let hosts_part = bracket_parts[0];
    let mut options = AgentOptions::default();
    if let Some(opts_part) = bracket_parts.get(1) {
        options = parse_options(opts_part)?;
    }

    let mut mirrors = Vec::new();
    for raw_agent in hosts_part.split('|') {
        let raw_agent = raw_agent.trim();
        if raw_agent.is_empty() {
            continue;
        }

        let ((family, addr, port), _warning, remainder) = parse_address_port(raw_agent)?;
        let mut indexes = Vec::new();
        let rest = remainder.trim_start();
        if !rest.is_empty() {
            let rest = rest.strip_prefix(':').ok_or_else(|| {
                    format!("after host/socket expected ':', then index(es), but got '{}')",
                            rest)
                })?
                .trim();
            if !rest.is_empty() {
                indexes = parse_index_list(rest);
            }
        }

        mirrors.push(ParsedAgent {
            family,
            addr,
            port,
            persistent: options.persistent,
            blackhole: options.blackhole,
            indexes,
        });
    }

    if options.retry_count_multiplier == 0 {
        options.retry_count_multiplier = mirrors.len() as i32;
    }

    // Backfill empty per-mirror index lists from the next mirror (or the
    // parent index name), walking from the tail.
    let mut last_index: Vec<String> = vec![default_index.to_string()];
    for mirror in mirrors.iter_mut().rev() {
        if mirror.indexes.is_empty() {
            mirror.indexes = last_index.clone();
        } else {
            last_index = mirror.indexes.clone();
        }
    }

    Ok((mirrors, options))
}
