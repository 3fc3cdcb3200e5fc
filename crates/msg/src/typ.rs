//! BGP message type codes

use std::fmt;
use std::str::FromStr;

use crate::MsgError;

/// One-byte BGP message type code.
///
/// The named constants cover the standard types; any other byte value passes
/// through untouched so unknown types can still be filtered and forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MsgType(pub u8);

impl MsgType {
    pub const INVALID: MsgType = MsgType(0);
    pub const OPEN: MsgType = MsgType(1);
    pub const UPDATE: MsgType = MsgType(2);
    pub const NOTIFY: MsgType = MsgType(3);
    pub const KEEPALIVE: MsgType = MsgType(4);
    pub const REFRESH: MsgType = MsgType(5);

    /// Raw type code
    #[inline]
    pub fn code(self) -> u8 {
        self.0
    }

    /// Canonical name, if this is a standard type
    pub fn name(self) -> Option<&'static str> {
        match self {
            MsgType::INVALID => Some("INVALID"),
            MsgType::OPEN => Some("OPEN"),
            MsgType::UPDATE => Some("UPDATE"),
            MsgType::NOTIFY => Some("NOTIFY"),
            MsgType::KEEPALIVE => Some("KEEPALIVE"),
            MsgType::REFRESH => Some("REFRESH"),
            _ => None,
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for MsgType {
    type Err = MsgError;

    /// Parses a canonical name or a plain decimal code, as accepted by
    /// `--type` filter lists.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INVALID" => return Ok(MsgType::INVALID),
            "OPEN" => return Ok(MsgType::OPEN),
            "UPDATE" => return Ok(MsgType::UPDATE),
            "NOTIFY" | "NOTIFICATION" => return Ok(MsgType::NOTIFY),
            "KEEPALIVE" => return Ok(MsgType::KEEPALIVE),
            "REFRESH" | "ROUTE-REFRESH" => return Ok(MsgType::REFRESH),
            _ => {}
        }
        match s.parse::<u16>() {
            Ok(code) if code <= 0xff => Ok(MsgType(code as u8)),
            _ => Err(MsgError::Type(s.to_string())),
        }
    }
}
