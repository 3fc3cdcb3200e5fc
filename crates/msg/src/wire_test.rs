//! Wire framing tests
//!
//! Round-trip fidelity and header validation for the raw frame codec,
//! plus the UPDATE/OPEN body encoders.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::json;

use crate::wire::{self, encode_open, from_wire, HEADER_LEN};
use crate::{Body, Caps, Msg, MsgError, MsgType, UpdateBody};

/// Build a complete wire frame around the given body
fn frame(typ: u8, body: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_slice(&[0xff; 16]);
    out.put_u16((HEADER_LEN + body.len()) as u16);
    out.put_u8(typ);
    out.put_slice(body);
    out.to_vec()
}

// ============================================================================
// Frame parsing
// ============================================================================

#[test]
fn test_keepalive_round_trip_is_byte_identical() {
    let bytes = frame(4, &[]);
    let (msg, consumed) = from_wire(&bytes).unwrap();

    assert_eq!(consumed, bytes.len());
    assert_eq!(msg.typ(), MsgType::KEEPALIVE);
    assert_eq!(msg.marshal(&Caps::default()).unwrap(), Bytes::from(bytes));
}

#[test]
fn test_update_round_trip_is_byte_identical() {
    let body = [0u8, 0, 0, 0, 8, 10]; // no withdrawn, no attrs, nlri 10/8
    let bytes = frame(2, &body);
    let (msg, _) = from_wire(&bytes).unwrap();

    assert_eq!(msg.typ(), MsgType::UPDATE);
    assert_eq!(msg.marshal(&Caps::default()).unwrap(), Bytes::from(bytes));
}

#[test]
fn test_partial_frame_wants_more() {
    let bytes = frame(4, &[1, 2, 3]);
    assert!(matches!(from_wire(&bytes[..10]), Err(MsgError::Incomplete)));
    assert!(matches!(
        from_wire(&bytes[..bytes.len() - 1]),
        Err(MsgError::Incomplete)
    ));
}

#[test]
fn test_bad_marker_rejected() {
    let mut bytes = frame(4, &[]);
    bytes[3] = 0x00;
    assert!(matches!(from_wire(&bytes), Err(MsgError::Marker)));
}

#[test]
fn test_bad_length_rejected() {
    let mut bytes = frame(4, &[]);
    bytes[16] = 0;
    bytes[17] = 5; // shorter than the header itself
    assert!(matches!(from_wire(&bytes), Err(MsgError::Length)));

    let mut bytes = frame(4, &[]);
    bytes[16] = 0xff;
    bytes[17] = 0xff; // above the 4096 cap
    assert!(matches!(from_wire(&bytes), Err(MsgError::Length)));
}

#[test]
fn test_consumed_leaves_trailing_bytes() {
    let mut bytes = frame(4, &[]);
    bytes.extend_from_slice(b"tail");
    let (_, consumed) = from_wire(&bytes).unwrap();
    assert_eq!(consumed, bytes.len() - 4);
}

// ============================================================================
// UPDATE body codec
// ============================================================================

#[test]
fn test_update_encode_decode() {
    let mut u = UpdateBody {
        reach: vec!["10.0.0.0/8".into(), "192.0.2.0/24".into()],
        unreach: vec!["198.51.100.0/24".into()],
        ..Default::default()
    };
    u.attrs.insert("origin".into(), json!("IGP"));
    u.attrs.insert("as_path".into(), json!([65000, 65001]));
    u.attrs.insert("next_hop".into(), json!("192.0.2.1"));

    let body = wire::encode_update(&u, &Caps::default()).unwrap();
    let back = wire::decode_update(&body).unwrap();

    assert_eq!(back.reach, u.reach);
    assert_eq!(back.unreach, u.unreach);
    assert_eq!(back.attrs.get("origin"), Some(&json!("IGP")));
    assert_eq!(back.attrs.get("as_path"), Some(&json!([65000, 65001])));
    assert_eq!(back.attrs.get("next_hop"), Some(&json!("192.0.2.1")));
}

#[test]
fn test_short_prefix_form_matches_full_form() {
    let short = UpdateBody {
        reach: vec!["10/8".into()],
        ..Default::default()
    };
    let full = UpdateBody {
        reach: vec!["10.0.0.0/8".into()],
        ..Default::default()
    };
    let caps = Caps::default();
    assert_eq!(
        wire::encode_update(&short, &caps).unwrap(),
        wire::encode_update(&full, &caps).unwrap()
    );
}

#[test]
fn test_two_byte_as_path_without_as4() {
    let mut u = UpdateBody::default();
    u.attrs.insert("as_path".into(), json!([65000]));

    let mut caps = Caps::default();
    caps.set_as4(false);
    let body = wire::encode_update(&u, &caps).unwrap();

    // attr header (3) + segment header (2) + one 2-byte hop
    assert_eq!(&body[4..], &[0x40, 2, 4, 2, 1, 0xfd, 0xe8]);
}

#[test]
fn test_unknown_attr_key_is_unsupported() {
    let mut u = UpdateBody::default();
    u.attrs.insert("communities".into(), json!(["65000:1"]));
    assert!(matches!(
        wire::encode_update(&u, &Caps::default()),
        Err(MsgError::Unsupported(_))
    ));
}

#[test]
fn test_bad_prefix_rejected() {
    for bad in ["10.0.0.0", "10.0.0.0/33", "300/8", "x/8"] {
        let u = UpdateBody {
            reach: vec![bad.into()],
            ..Default::default()
        };
        assert!(
            matches!(
                wire::encode_update(&u, &Caps::default()),
                Err(MsgError::Prefix(_))
            ),
            "prefix {bad:?} should be rejected"
        );
    }
}

#[test]
fn test_marshal_update_body_framed() {
    let u = UpdateBody {
        reach: vec!["10/8".into()],
        ..Default::default()
    };
    let msg = Msg::update(u);
    let bytes = msg.marshal(&Caps::default()).unwrap();

    let (back, consumed) = from_wire(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(back.typ(), MsgType::UPDATE);
    match back.body() {
        Body::Raw(b) => assert_eq!(&b[..], &[0, 0, 0, 0, 8, 10]),
        other => panic!("unexpected body: {other:?}"),
    }
}

// ============================================================================
// OPEN body
// ============================================================================

#[test]
fn test_open_with_as4_capability() {
    let body = encode_open(65537, 90, "203.0.113.7".parse().unwrap(), &Caps::default());

    assert_eq!(body[0], 4); // version
    // ASN above 16 bits: 2-byte field carries AS_TRANS
    assert_eq!(u16::from_be_bytes([body[1], body[2]]), 23456);
    assert_eq!(u16::from_be_bytes([body[3], body[4]]), 90);
    assert_eq!(&body[5..9], &[203, 0, 113, 7]);
    // capabilities parameter with AS4
    assert_eq!(&body[9..14], &[8, 2, 6, 65, 4]);
    assert_eq!(
        u32::from_be_bytes([body[14], body[15], body[16], body[17]]),
        65537
    );
    assert_eq!(body.len(), 18);
}

#[test]
fn test_open_short_asn() {
    let mut caps = Caps::default();
    caps.set_as4(false);
    let body = encode_open(65000, 180, "203.0.113.7".parse().unwrap(), &caps);

    assert_eq!(u16::from_be_bytes([body[1], body[2]]), 65000);
    assert_eq!(body[9], 0); // no optional parameters
    assert_eq!(body.len(), 10);
}
