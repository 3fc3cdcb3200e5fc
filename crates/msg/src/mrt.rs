//! MRT BGP4MP record parsing
//!
//! Reads BGP4MP / BGP4MP_ET records and extracts the embedded wire frame.
//! Every other record kind parses far enough to be skipped cleanly, so a
//! replay can walk a mixed dump without raising errors.

use chrono::{DateTime, Utc};

use crate::{wire, MsgError, Msg, Result};

const MRT_HEADER_LEN: usize = 12;

const TYPE_BGP4MP: u16 = 16;
const TYPE_BGP4MP_ET: u16 = 17;

const SUB_MESSAGE: u16 = 1;
const SUB_MESSAGE_AS4: u16 = 4;
const SUB_MESSAGE_LOCAL: u16 = 6;
const SUB_MESSAGE_AS4_LOCAL: u16 = 7;

/// Outcome of parsing one MRT record
#[derive(Debug)]
pub enum MrtParse {
    /// A BGP message record
    Msg { msg: Msg, consumed: usize },

    /// A well-formed record that carries no BGP message (state change,
    /// table dump, peer index...); skipped silently by callers
    Skip { consumed: usize },
}

/// MRT record reader.
///
/// Stateless today; kept as a struct so per-session context (AS4 peer
/// tracking) has a home when it is needed.
#[derive(Debug, Default)]
pub struct MrtReader {
    /// Skip tagging messages with MRT peer metadata
    pub no_tags: bool,
}

impl MrtReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one record from the start of `buf`.
    ///
    /// A partial record is [`MsgError::Incomplete`]; stream callers buffer
    /// and retry with more bytes.
    pub fn read_record(&self, buf: &[u8]) -> Result<MrtParse> {
        if buf.len() < MRT_HEADER_LEN {
            return Err(MsgError::Incomplete);
        }

        let ts = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let typ = u16::from_be_bytes([buf[4], buf[5]]);
        let subtype = u16::from_be_bytes([buf[6], buf[7]]);
        let len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;

        let consumed = MRT_HEADER_LEN + len;
        if buf.len() < consumed {
            return Err(MsgError::Incomplete);
        }
        let mut body = &buf[MRT_HEADER_LEN..consumed];

        // only BGP4MP carries messages
        if typ != TYPE_BGP4MP && typ != TYPE_BGP4MP_ET {
            return Ok(MrtParse::Skip { consumed });
        }

        let mut micros = 0u32;
        if typ == TYPE_BGP4MP_ET {
            if body.len() < 4 {
                return Err(MsgError::Length);
            }
            micros = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            body = &body[4..];
        }

        let as4 = match subtype {
            SUB_MESSAGE | SUB_MESSAGE_LOCAL => false,
            SUB_MESSAGE_AS4 | SUB_MESSAGE_AS4_LOCAL => true,
            _ => return Ok(MrtParse::Skip { consumed }),
        };

        let (peer_as, peer_ip, rest) = parse_bgp4mp_header(body, as4)?;

        let (mut msg, used) = wire::from_wire(rest)?;
        if used != rest.len() {
            return Err(MsgError::Length);
        }

        msg.time = mrt_time(ts, micros);
        if !self.no_tags {
            msg.tags.insert("mrt.peer_as".into(), peer_as.to_string());
            msg.tags.insert("mrt.peer_ip".into(), peer_ip);
        }

        Ok(MrtParse::Msg { msg, consumed })
    }
}

/// Peer AS, peer IP and the remaining bytes (the embedded wire frame)
fn parse_bgp4mp_header(body: &[u8], as4: bool) -> Result<(u32, String, &[u8])> {
    let as_size = if as4 { 4 } else { 2 };
    // peer AS + local AS + ifindex + AFI
    let fixed = 2 * as_size + 4;
    if body.len() < fixed {
        return Err(MsgError::Length);
    }

    let peer_as = if as4 {
        u32::from_be_bytes([body[0], body[1], body[2], body[3]])
    } else {
        u16::from_be_bytes([body[0], body[1]]) as u32
    };

    let afi = u16::from_be_bytes([body[fixed - 2], body[fixed - 1]]);
    let ip_size = match afi {
        1 => 4,
        2 => 16,
        _ => return Err(MsgError::Format),
    };

    let addrs_end = fixed + 2 * ip_size;
    if body.len() < addrs_end {
        return Err(MsgError::Length);
    }

    let peer_ip = render_ip(&body[fixed..fixed + ip_size]);
    Ok((peer_as, peer_ip, &body[addrs_end..]))
}

fn render_ip(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string(),
        16 => {
            let mut o = [0u8; 16];
            o.copy_from_slice(bytes);
            std::net::Ipv6Addr::from(o).to_string()
        }
        _ => String::new(),
    }
}

fn mrt_time(secs: u32, micros: u32) -> DateTime<Utc> {
    let nanos = (micros % 1_000_000) * 1000;
    DateTime::from_timestamp(secs as i64, nanos).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
