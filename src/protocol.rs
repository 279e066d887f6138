//! Wire framing for the agent protocol (spec §4.5, §6): handshake,
//! persist prelude, and the 8-byte reply header. Request bodies and reply
//! payload schemas are caller-supplied via `RequestBuilder`/`ReplyParser`
//! (spec §1, explicitly out of scope here).

/// Protocol version this dispatcher speaks and expects back.
pub const PROTOCOL_VERSION: u32 = 1;

/// Command code for the persist-connection prelude sent once per fresh
/// persistent socket.
const COMMAND_PERSIST: u16 = 4;
const COMMAND_VERSION: u16 = 0;

/// Reply status codes (spec §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    Retry,
    Warning,
}

impl Status {
    fn from_u16(v: u16) -> Option<Status> {
        match v {
            0 => Some(Status::Ok),
            1 => Some(Status::Error),
            2 => Some(Status::Retry),
            3 => Some(Status::Warning),
            _ => None,
        }
    }
}

/// Parsed 8-byte reply header: `{uint16 status, uint16 version, int32 length}`.
#[derive(Clone, Copy, Debug)]
pub struct ReplyHeader {
    pub status: Status,
    pub version: u16,
    pub length: i32,
}

pub const REPLY_HEADER_LEN: usize = 8;

/// Parses a reply header, rejecting unknown status codes and lengths
/// outside `[0, max_packet_size]` (spec §4.5 "Reply framing").
pub fn parse_reply_header(buf: &[u8; REPLY_HEADER_LEN],
                           max_packet_size: i32)
                           -> Result<ReplyHeader, String> {
    let status_raw = u16::from_be_bytes([buf[0], buf[1]]);
    let version = u16::from_be_bytes([buf[2], buf[3]]);
    let length = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

    let status = Status::from_u16(status_raw)
        .ok_or_else(|| format!("unknown reply status {}", status_raw))?;
    if length < 0 || length > max_packet_size {
        return Err(format!("reply length {} out of bounds (max {})", length, max_packet_size));
    }
    Ok(ReplyHeader { status, version, length })
}

/// Encodes the 4-byte handshake, big-endian.
pub fn encode_handshake() -> [u8; 4] {
    PROTOCOL_VERSION.to_be_bytes()
}

/// Accepts a peer's handshake version in either network order (correct)
/// or host order (a documented peer bug workaround, spec §4.5).
pub fn decode_handshake_version(buf: [u8; 4]) -> u32 {
    let network = u32::from_be_bytes(buf);
    if network == PROTOCOL_VERSION {
        return network;
    }
    u32::from_ne_bytes(buf)
}

pub fn is_valid_handshake_version(v: u32) -> bool {
    v == PROTOCOL_VERSION
}

/// Encodes the `COMMAND_PERSIST` prelude sent immediately after handshake
/// on a fresh persistent socket: an 8-byte header followed by a 4-byte
/// body `{int32 1}`.
pub fn encode_persist_prelude() -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0..2].copy_from_slice(&COMMAND_PERSIST.to_be_bytes());
    buf[2..4].copy_from_slice(&COMMAND_VERSION.to_be_bytes());
    buf[4..8].copy_from_slice(&4i32.to_be_bytes());
    buf[8..12].copy_from_slice(&1i32.to_be_bytes());
    buf
}

/// Builds the request body for one attempt, given the index name(s) it
/// targets. Supplied by the caller; the dispatcher only frames it.
pub trait RequestBuilder: Send + Sync {
    fn build(&self, indexes: &[String]) -> Vec<u8>;
}

/// Outcome of handing a complete reply body to the caller's parser.
#[derive(Clone, Copy, Debug)]
pub struct ParsedReply {
    /// Bytes the parser actually consumed.
    pub consumed: usize,
    /// Parser-reported success.
    pub ok: bool,
    /// Whether any parsed result carried a warning (used to choose between
    /// `NetworkCritical`/`NetworkNonCritical` billing on a WARNING status).
    pub has_warning: bool,
}

/// Parses a complete reply body. Supplied by the caller; the dispatcher
/// only validates that it consumed everything it was handed.
pub trait ReplyParser: Send + Sync {
    fn parse(&self, body: &[u8]) -> ParsedReply;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips_network_order() {
        let buf = encode_handshake();
        assert_eq!(decode_handshake_version(buf), PROTOCOL_VERSION);
        assert!(is_valid_handshake_version(decode_handshake_version(buf)));
    }

    #[test]
    fn handshake_accepts_host_order_peer_bug() {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&PROTOCOL_VERSION.to_ne_bytes());
        assert_eq!(decode_handshake_version(buf), PROTOCOL_VERSION);
    }

    #[test]
    fn reply_header_rejects_oversize_length() {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&0u16.to_be_bytes());
        buf[4..8].copy_from_slice(&1000i32.to_be_bytes());
        assert!(parse_reply_header(&buf, 999).is_err());
    }

    #[test]
    fn reply_header_parses_ok_status() {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&0u16.to_be_bytes());
        buf[2..4].copy_from_slice(&1u16.to_be_bytes());
        buf[4..8].copy_from_slice(&42i32.to_be_bytes());
        let header = parse_reply_header(&buf, 1024).unwrap();
        assert_eq!(header.status, Status::Ok);
        assert_eq!(header.version, 1);
        assert_eq!(header.length, 42);
    }
}
