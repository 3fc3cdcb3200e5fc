//! bgpipe - Message model and codecs
//!
//! The message types that flow through a bgpipe pipeline, together with the
//! three representations the I/O boundary speaks: raw BGP wire frames, MRT
//! BGP4MP records, and one-message-per-line JSON.
//!
//! # Design
//!
//! - **Opaque core**: the pipeline treats a [`Msg`] as an opaque value with a
//!   direction, sequence number, timestamp, type code and tag map. Payload
//!   bytes use `bytes::Bytes` so sharing a body across stages is O(1).
//! - **Wire fidelity**: a message parsed from the wire keeps its body bytes
//!   verbatim; re-marshalling emits the identical frame.
//! - **Canonical JSON**: serializing a parsed message is a fixed point, so
//!   JSON filters can round-trip messages without drift.

mod caps;
mod dir;
mod error;
mod json;
mod msg;
mod mrt;
mod typ;
mod wire;

pub use caps::Caps;
pub use dir::Dir;
pub use error::MsgError;
pub use json::{msg_from_json, update_from_json};
pub use mrt::{MrtParse, MrtReader};
pub use msg::{Action, Body, Msg, MsgCtx, UpdateBody};
pub use typ::MsgType;
pub use wire::{encode_open, from_wire, HEADER_LEN, MAX_MSG_LEN};

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, MsgError>;

#[cfg(test)]
mod wire_test;
