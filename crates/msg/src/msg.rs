//! The message value that flows through a pipeline

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Map;

use crate::{Dir, MsgType};

/// Routing hints attached to a message while it traverses the callback chain.
///
/// The action flags are reset each time the message is re-injected; the
/// borrow flag marks a payload that must be copied before it may be retained
/// past the current callback invocation.
#[derive(Debug, Default, Clone)]
pub struct Action {
    drop: bool,
    accept: bool,
}

impl Action {
    /// Hijack the message out of the in-pipe flow; later callbacks and the
    /// stream output will not see it.
    #[inline]
    pub fn drop(&mut self) {
        self.drop = true;
    }

    /// Let the message through regardless of later filters
    #[inline]
    pub fn accept(&mut self) {
        self.accept = true;
    }

    #[inline]
    pub fn is_drop(&self) -> bool {
        self.drop
    }

    #[inline]
    pub fn is_accept(&self) -> bool {
        self.accept
    }

    /// Clear both flags, used on re-injection
    #[inline]
    pub fn clear(&mut self) {
        self.drop = false;
        self.accept = false;
    }
}

/// Per-message context carried alongside the payload
#[derive(Debug, Default, Clone)]
pub struct MsgCtx {
    /// Routing action set by callbacks
    pub action: Action,

    /// Payload bytes are borrowed and must be copied before retention
    pub borrowed: bool,
}

/// Message body representation
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No body (KEEPALIVE, or not yet filled in)
    #[default]
    None,

    /// Verbatim wire body, without the 19-byte header
    Raw(Bytes),

    /// UPDATE parsed from its JSON object form
    Update(UpdateBody),
}

/// An UPDATE expressed as announced/withdrawn prefixes plus attributes.
///
/// Attribute values keep their JSON representation; the wire encoder knows
/// the standard ones (origin, as_path, next_hop) and falls back to hex for
/// numeric keys.
#[derive(Debug, Clone, Default)]
pub struct UpdateBody {
    /// Announced prefixes ("10.0.0.0/8", shortened forms accepted)
    pub reach: Vec<String>,

    /// Withdrawn prefixes
    pub unreach: Vec<String>,

    /// Path attributes, keyed by name or decimal type code
    pub attrs: Map<String, serde_json::Value>,
}

/// One BGP message in flight.
///
/// Direction and sequence number start unset; the stream that first accepts
/// the message stamps them, and they are never rewritten afterwards
/// (re-injection with `--no-seq` clears the seq *before* the hand-off).
#[derive(Debug, Clone)]
pub struct Msg {
    dir: Option<Dir>,
    seq: u64,
    typ: MsgType,
    body: Body,

    /// Receive or parse timestamp
    pub time: DateTime<Utc>,

    /// Free-form metadata attached by stages
    pub tags: BTreeMap<String, String>,

    /// Routing hints, never serialized
    pub ctx: MsgCtx,
}

impl Msg {
    /// Create an empty message of the given type, stamped with the current time
    pub fn new(typ: MsgType) -> Self {
        Self {
            dir: None,
            seq: 0,
            typ,
            body: Body::None,
            time: Utc::now(),
            tags: BTreeMap::new(),
            ctx: MsgCtx::default(),
        }
    }

    /// A KEEPALIVE message
    pub fn keepalive() -> Self {
        Self::new(MsgType::KEEPALIVE)
    }

    /// An UPDATE with the given body
    pub fn update(body: UpdateBody) -> Self {
        let mut m = Self::new(MsgType::UPDATE);
        m.body = Body::Update(body);
        m
    }

    /// A message wrapping verbatim wire body bytes
    pub fn raw(typ: MsgType, body: Bytes) -> Self {
        let mut m = Self::new(typ);
        m.body = Body::Raw(body);
        m
    }

    /// Flow direction, unset until the first enqueue
    #[inline]
    pub fn dir(&self) -> Option<Dir> {
        self.dir
    }

    /// Per-direction sequence number, 0 until assigned
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Message type code
    #[inline]
    pub fn typ(&self) -> MsgType {
        self.typ
    }

    /// Message body
    #[inline]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Stamp the flow direction. Streams call this on enqueue; stages should
    /// only set it on messages they are about to inject.
    #[inline]
    pub fn set_dir(&mut self, dir: Dir) {
        self.dir = Some(dir);
    }

    /// Stamp the sequence number. Assigned once by the stream pump.
    #[inline]
    pub fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    /// Clear the sequence number so the next stream hand-off assigns a fresh
    /// one (`--no-seq`).
    #[inline]
    pub fn clear_seq(&mut self) {
        self.seq = 0;
    }

    /// Replace the type, keeping the body
    #[inline]
    pub fn set_typ(&mut self, typ: MsgType) {
        self.typ = typ;
    }

    /// Replace the body
    #[inline]
    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Wire body length in bytes (0 for JSON-only bodies)
    pub fn body_len(&self) -> usize {
        match &self.body {
            Body::Raw(b) => b.len(),
            _ => 0,
        }
    }

    /// Ensure the payload is owned by this message.
    ///
    /// Payload bytes may alias an I/O buffer while the message is inside the
    /// reading stage; crossing a stage boundary requires an owned copy.
    pub fn copy_data(&mut self) {
        if !self.ctx.borrowed {
            return;
        }
        if let Body::Raw(b) = &self.body {
            self.body = Body::Raw(Bytes::copy_from_slice(b));
        }
        self.ctx.borrowed = false;
    }

    /// Drop all tags (`--no-tags`)
    #[inline]
    pub fn drop_tags(&mut self) {
        self.tags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_unassigned() {
        let m = Msg::keepalive();
        assert_eq!(m.dir(), None);
        assert_eq!(m.seq(), 0);
        assert_eq!(m.typ(), MsgType::KEEPALIVE);
    }

    #[test]
    fn test_copy_data_unborrows() {
        let mut m = Msg::raw(MsgType::UPDATE, Bytes::from_static(b"\x00\x00\x00\x00"));
        m.ctx.borrowed = true;
        m.copy_data();
        assert!(!m.ctx.borrowed);
        assert_eq!(m.body_len(), 4);
    }

    #[test]
    fn test_action_flags() {
        let mut a = Action::default();
        assert!(!a.is_drop());
        a.drop();
        assert!(a.is_drop());
        a.clear();
        assert!(!a.is_drop());
    }
}
