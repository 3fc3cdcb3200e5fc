//! Raw BGP wire framing and the UPDATE/OPEN body codecs
//!
//! A wire frame is the classic 19-byte header (16 marker bytes, u16 total
//! length, u8 type) followed by the body. Messages parsed from the wire keep
//! their body bytes verbatim, so marshalling them again is byte-identical.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::{Body, Caps, Msg, MsgError, MsgType, Result, UpdateBody};

/// Wire header length: marker + length + type
pub const HEADER_LEN: usize = 19;

/// Maximum wire frame length
pub const MAX_MSG_LEN: usize = 4096;

/// Placeholder ASN used in 2-byte fields when the real ASN does not fit
const AS_TRANS: u16 = 23456;

const MARKER: [u8; 16] = [0xff; 16];

/// Parse one wire frame from the start of `buf`.
///
/// Returns the message and the number of bytes consumed. A partial frame is
/// [`MsgError::Incomplete`]; callers doing stream reads buffer and retry.
pub fn from_wire(buf: &[u8]) -> Result<(Msg, usize)> {
    if buf.len() < HEADER_LEN {
        return Err(MsgError::Incomplete);
    }
    if buf[..16] != MARKER {
        return Err(MsgError::Marker);
    }

    let total = u16::from_be_bytes([buf[16], buf[17]]) as usize;
    if !(HEADER_LEN..=MAX_MSG_LEN).contains(&total) {
        return Err(MsgError::Length);
    }
    if buf.len() < total {
        return Err(MsgError::Incomplete);
    }

    let typ = MsgType(buf[18]);
    let body = Bytes::copy_from_slice(&buf[HEADER_LEN..total]);
    Ok((Msg::raw(typ, body), total))
}

impl Msg {
    /// Serialize into a complete wire frame.
    ///
    /// Raw bodies are re-framed verbatim; JSON-sourced UPDATE bodies are
    /// encoded against the session capabilities.
    pub fn marshal(&self, caps: &Caps) -> Result<Bytes> {
        let body = match self.body() {
            Body::Raw(b) => b.clone(),
            Body::Update(u) => encode_update(u, caps)?,
            Body::None => Bytes::new(),
        };

        let total = HEADER_LEN + body.len();
        if total > MAX_MSG_LEN {
            return Err(MsgError::Length);
        }

        let mut out = BytesMut::with_capacity(total);
        out.put_slice(&MARKER);
        out.put_u16(total as u16);
        out.put_u8(self.typ().code());
        out.put_slice(&body);
        Ok(out.freeze())
    }
}

/// Encode an OPEN body for the given local parameters.
///
/// With 4-byte ASNs enabled the AS4 capability is advertised and the 2-byte
/// field carries AS_TRANS when the ASN does not fit.
pub fn encode_open(asn: u32, hold: u16, id: Ipv4Addr, caps: &Caps) -> Bytes {
    let short_as = if asn > u16::MAX as u32 {
        AS_TRANS
    } else {
        asn as u16
    };

    let mut out = BytesMut::with_capacity(29);
    out.put_u8(4); // version
    out.put_u16(short_as);
    out.put_u16(hold);
    out.put_slice(&id.octets());

    if caps.has_as4() {
        // one optional parameter: capabilities, containing AS4 (code 65)
        out.put_u8(8); // opt params len
        out.put_u8(2); // param: capabilities
        out.put_u8(6); // param len
        out.put_u8(65); // AS4 capability
        out.put_u8(4);
        out.put_u32(asn);
    } else {
        out.put_u8(0);
    }

    out.freeze()
}

// =============================================================================
// UPDATE body encoding (JSON object form -> wire)
// =============================================================================

pub(crate) fn encode_update(u: &UpdateBody, caps: &Caps) -> Result<Bytes> {
    let mut withdrawn = BytesMut::new();
    for p in &u.unreach {
        encode_prefix(p, &mut withdrawn)?;
    }

    let mut attrs = BytesMut::new();
    for (key, val) in &u.attrs {
        encode_attr(key, val, caps, &mut attrs)?;
    }

    let mut nlri = BytesMut::new();
    for p in &u.reach {
        encode_prefix(p, &mut nlri)?;
    }

    let mut out = BytesMut::with_capacity(4 + withdrawn.len() + attrs.len() + nlri.len());
    out.put_u16(withdrawn.len() as u16);
    out.put_slice(&withdrawn);
    out.put_u16(attrs.len() as u16);
    out.put_slice(&attrs);
    out.put_slice(&nlri);
    Ok(out.freeze())
}

fn encode_attr(key: &str, val: &Value, caps: &Caps, out: &mut BytesMut) -> Result<()> {
    match key {
        "origin" => {
            let code = match val.as_str() {
                Some("IGP") => 0u8,
                Some("EGP") => 1,
                Some("INCOMPLETE") => 2,
                _ => return Err(MsgError::Unsupported("origin value")),
            };
            put_attr(out, 0x40, 1, &[code]);
        }
        "as_path" => {
            let path = val
                .as_array()
                .ok_or(MsgError::Unsupported("as_path value"))?;
            let mut seg = BytesMut::new();
            seg.put_u8(2); // AS_SEQUENCE
            seg.put_u8(path.len() as u8);
            for hop in path {
                let asn = hop
                    .as_u64()
                    .filter(|&n| n <= u32::MAX as u64)
                    .ok_or(MsgError::Unsupported("as_path hop"))? as u32;
                if caps.has_as4() {
                    seg.put_u32(asn);
                } else if asn > u16::MAX as u32 {
                    seg.put_u16(AS_TRANS);
                } else {
                    seg.put_u16(asn as u16);
                }
            }
            put_attr(out, 0x40, 2, &seg);
        }
        "next_hop" => {
            let ip: Ipv4Addr = val
                .as_str()
                .and_then(|s| s.parse().ok())
                .ok_or(MsgError::Unsupported("next_hop value"))?;
            put_attr(out, 0x40, 3, &ip.octets());
        }
        _ => {
            // decimal type code with hex payload, kept from a wire decode
            let code: u8 = key
                .parse()
                .map_err(|_| MsgError::Unsupported("attribute key"))?;
            let data = val
                .as_str()
                .and_then(|s| hex::decode(s).ok())
                .ok_or(MsgError::Unsupported("attribute value"))?;
            put_attr(out, 0xc0, code, &data);
        }
    }
    Ok(())
}

fn put_attr(out: &mut BytesMut, flags: u8, code: u8, data: &[u8]) {
    if data.len() > 255 {
        out.put_u8(flags | 0x10); // extended length
        out.put_u8(code);
        out.put_u16(data.len() as u16);
    } else {
        out.put_u8(flags);
        out.put_u8(code);
        out.put_u8(data.len() as u8);
    }
    out.put_slice(data);
}

// =============================================================================
// UPDATE body decoding (wire -> JSON object form), used for display only
// =============================================================================

/// Decode a wire UPDATE body into its JSON object form.
///
/// Display-only: the raw body stays authoritative for re-marshalling.
/// Attributes beyond origin/as_path/next_hop fall back to hex under their
/// decimal type code.
pub(crate) fn decode_update(body: &[u8]) -> Result<UpdateBody> {
    let mut u = UpdateBody::default();
    let mut pos = 0usize;

    let wlen = read_u16(body, &mut pos)? as usize;
    let wend = pos + wlen;
    if wend > body.len() {
        return Err(MsgError::Length);
    }
    while pos < wend {
        u.unreach.push(decode_prefix_v4(body, &mut pos)?);
    }

    let alen = read_u16(body, &mut pos)? as usize;
    let aend = pos + alen;
    if aend > body.len() {
        return Err(MsgError::Length);
    }
    while pos < aend {
        decode_attr(body, &mut pos, aend, &mut u)?;
    }

    while pos < body.len() {
        u.reach.push(decode_prefix_v4(body, &mut pos)?);
    }

    Ok(u)
}

fn decode_attr(body: &[u8], pos: &mut usize, end: usize, u: &mut UpdateBody) -> Result<()> {
    if *pos + 2 > end {
        return Err(MsgError::Length);
    }
    let flags = body[*pos];
    let code = body[*pos + 1];
    *pos += 2;

    let len = if flags & 0x10 != 0 {
        read_u16(body, pos)? as usize
    } else {
        read_u8(body, pos)? as usize
    };
    if *pos + len > end {
        return Err(MsgError::Length);
    }
    let data = &body[*pos..*pos + len];
    *pos += len;

    match code {
        1 if len == 1 => {
            let origin = match data[0] {
                0 => "IGP",
                1 => "EGP",
                2 => "INCOMPLETE",
                _ => return Err(MsgError::Format),
            };
            u.attrs.insert("origin".into(), origin.into());
        }
        2 => match decode_as_sequence(data) {
            Some(path) => {
                u.attrs.insert("as_path".into(), Value::Array(path));
            }
            None => {
                u.attrs.insert("2".into(), hex::encode(data).into());
            }
        },
        3 if len == 4 => {
            let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
            u.attrs.insert("next_hop".into(), ip.to_string().into());
        }
        _ => {
            u.attrs.insert(code.to_string(), hex::encode(data).into());
        }
    }
    Ok(())
}

/// Decodes a single AS_SEQUENCE segment, trying 4-byte then 2-byte hops.
/// Anything more exotic renders as hex.
fn decode_as_sequence(data: &[u8]) -> Option<Vec<Value>> {
    if data.len() < 2 || data[0] != 2 {
        return None;
    }
    let count = data[1] as usize;
    let body = &data[2..];

    let size = if body.len() == count * 4 {
        4
    } else if body.len() == count * 2 {
        2
    } else {
        return None;
    };

    let mut path = Vec::with_capacity(count);
    for hop in body.chunks(size) {
        let asn = match size {
            4 => u32::from_be_bytes([hop[0], hop[1], hop[2], hop[3]]) as u64,
            _ => u16::from_be_bytes([hop[0], hop[1]]) as u64,
        };
        path.push(Value::from(asn));
    }
    Some(path)
}

// =============================================================================
// Prefix codec
// =============================================================================

/// Encode one prefix string as wire bytes (length byte + packed address).
///
/// Shortened IPv4 forms are accepted: "10/8" means "10.0.0.0/8".
fn encode_prefix(s: &str, out: &mut BytesMut) -> Result<()> {
    let err = || MsgError::Prefix(s.to_string());
    let (addr, len) = s.split_once('/').ok_or_else(err)?;
    let bits: u8 = len.parse().map_err(|_| err())?;

    let octets: Vec<u8>;
    let max_bits;
    if addr.contains(':') {
        let ip: Ipv6Addr = addr.parse().map_err(|_| err())?;
        octets = ip.octets().to_vec();
        max_bits = 128;
    } else {
        let mut o = [0u8; 4];
        let parts: Vec<&str> = addr.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(err());
        }
        for (i, p) in parts.iter().enumerate() {
            o[i] = p.parse().map_err(|_| err())?;
        }
        octets = o.to_vec();
        max_bits = 32;
    }

    if bits > max_bits {
        return Err(err());
    }

    let nbytes = (bits as usize + 7) / 8;
    out.put_u8(bits);
    out.put_slice(&octets[..nbytes]);
    Ok(())
}

/// Decode one IPv4 prefix at `pos`, rendering the full dotted form
fn decode_prefix_v4(body: &[u8], pos: &mut usize) -> Result<String> {
    let bits = read_u8(body, pos)?;
    if bits > 32 {
        return Err(MsgError::Format);
    }
    let nbytes = (bits as usize + 7) / 8;
    if *pos + nbytes > body.len() {
        return Err(MsgError::Length);
    }
    let mut o = [0u8; 4];
    o[..nbytes].copy_from_slice(&body[*pos..*pos + nbytes]);
    *pos += nbytes;
    Ok(format!("{}/{}", Ipv4Addr::from(o), bits))
}

fn read_u8(body: &[u8], pos: &mut usize) -> Result<u8> {
    let b = *body.get(*pos).ok_or(MsgError::Length)?;
    *pos += 1;
    Ok(b)
}

fn read_u16(body: &[u8], pos: &mut usize) -> Result<u16> {
    if *pos + 2 > body.len() {
        return Err(MsgError::Length);
    }
    let v = u16::from_be_bytes([body[*pos], body[*pos + 1]]);
    *pos += 2;
    Ok(v)
}
