//! Codec error types

use thiserror::Error;

/// Errors raised while parsing or serializing messages
#[derive(Debug, Error)]
pub enum MsgError {
    /// Input ends mid-frame; callers should buffer and retry with more bytes
    #[error("truncated input, need more bytes")]
    Incomplete,

    /// Wire header marker bytes are not all-ones
    #[error("bad marker bytes in wire header")]
    Marker,

    /// Frame length field out of range, or dangling bytes after a message
    #[error("invalid message length")]
    Length,

    /// Input matches none of the accepted representations
    #[error("unrecognized input format")]
    Format,

    /// Unknown message type name in a filter or JSON field
    #[error("unknown message type: {0}")]
    Type(String),

    /// Malformed prefix string (expected e.g. "10.0.0.0/8")
    #[error("invalid prefix: {0}")]
    Prefix(String),

    /// Valid input that this codec does not (yet) handle
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Malformed JSON input
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),
}
