//! End-to-end pipeline scenarios over the built-in stages

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use bgpipe_core::{Pipeline, Registry};
use bgpipe_msg::{Dir, Msg, MsgType};
use bgpipe_pipe::FnHandler;
use bgpipe_stages::register_all;

fn pipeline(args: &[&str]) -> Pipeline {
    let mut registry = Registry::new();
    register_all(&mut registry);
    let mut p = Pipeline::new(registry);
    let argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    p.configure(&argv).expect("configure");
    p
}

/// Collect every message passing the given direction, post-chain
fn observe(p: &Pipeline, dir: Dir) -> Arc<Mutex<Vec<Msg>>> {
    let log: Arc<Mutex<Vec<Msg>>> = Default::default();
    let seen = log.clone();
    p.pipe().on_msg(
        dir,
        Box::new(FnHandler(move |m: &mut Msg| {
            seen.lock().push(m.clone());
            true
        })),
        vec![],
    );
    log
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

// ============================================================================
// MRT replay (S2)
// ============================================================================

/// Raw UPDATE frame announcing `first_octet/8`
fn update_frame(first_octet: u8) -> Vec<u8> {
    let body = [0u8, 0, 0, 0, 8, first_octet];
    let mut frame = vec![0xffu8; 16];
    frame.extend_from_slice(&((19 + body.len()) as u16).to_be_bytes());
    frame.push(2);
    frame.extend_from_slice(&body);
    frame
}

fn mrt_record(typ: u16, subtype: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&1_700_000_000u32.to_be_bytes());
    out.extend_from_slice(&typ.to_be_bytes());
    out.extend_from_slice(&subtype.to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn bgp4mp_message(frame: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&65001u16.to_be_bytes()); // peer AS
    body.extend_from_slice(&64999u16.to_be_bytes()); // local AS
    body.extend_from_slice(&0u16.to_be_bytes()); // ifindex
    body.extend_from_slice(&1u16.to_be_bytes()); // AFI IPv4
    body.extend_from_slice(&[192, 0, 2, 10]);
    body.extend_from_slice(&[192, 0, 2, 20]);
    body.extend_from_slice(frame);
    body
}

#[tokio::test]
async fn test_mrt_replay_in_file_order_skipping_non_bgp() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for octet in [10, 20] {
        file.write_all(&mrt_record(16, 1, &bgp4mp_message(&update_frame(octet))))
            .unwrap();
    }
    // a table dump record in the middle must be skipped without an error
    file.write_all(&mrt_record(13, 1, &[0u8; 16])).unwrap();
    file.write_all(&mrt_record(16, 1, &bgp4mp_message(&update_frame(30))))
        .unwrap();
    file.flush().unwrap();

    let path = file.path().to_str().unwrap();
    // the trailing grep keeps the R output open and exercises a full chain
    let mut p = pipeline(&["--silent", path, "--", "grep", "--type", "UPDATE"]);
    p.attach().unwrap();
    let log = observe(&p, Dir::R);

    p.start().await;
    p.wait().await.unwrap();

    let seen = log.lock();
    assert_eq!(seen.len(), 3, "three BGP4MP records, table dump skipped");
    for (i, (msg, octet)) in seen.iter().zip([10, 20, 30]).enumerate() {
        assert_eq!(msg.typ(), MsgType::UPDATE);
        assert_eq!(msg.seq(), i as u64 + 1);
        let json = msg.to_json();
        assert!(
            json.contains(&format!("\"{octet}.0.0.0/8\"")),
            "file order preserved: {json}"
        );
    }
}

// ============================================================================
// Type filtering (S4)
// ============================================================================

#[tokio::test]
async fn test_grep_drops_open_but_passes_update() {
    // the mrt stage pins grep to a non-first position; it never runs
    let mut p = pipeline(&["--silent", "dump.mrt", "--", "grep", "--type", "UPDATE"]);
    p.attach().unwrap();
    let log = observe(&p, Dir::R);

    // run the streams without the stage lifecycle; enable grep's callbacks
    p.stage(2)
        .unwrap()
        .running_flag()
        .store(true, Ordering::Relaxed);
    p.pipe().start();

    let input = p.pipe().add_input(Dir::R);
    input.write_msg(Msg::new(MsgType::OPEN)).await.unwrap();
    input.write_msg(Msg::new(MsgType::UPDATE)).await.unwrap();
    input.write_msg(Msg::keepalive()).await.unwrap();

    p.pipe().stream(Dir::L).close_input();
    p.pipe().stream(Dir::R).close_input();
    p.pipe().wait().await;

    let seen = log.lock();
    assert_eq!(seen.len(), 1, "OPEN and KEEPALIVE dropped");
    assert_eq!(seen[0].typ(), MsgType::UPDATE);
    assert_eq!(seen[0].seq(), 2, "dropped messages still consume seq");
}

#[tokio::test]
async fn test_grep_invert() {
    let mut p = pipeline(&[
        "--silent", "dump.mrt", "--", "grep", "-v", "--type", "UPDATE",
    ]);
    p.attach().unwrap();
    let log = observe(&p, Dir::R);

    p.stage(2)
        .unwrap()
        .running_flag()
        .store(true, Ordering::Relaxed);
    p.pipe().start();

    let input = p.pipe().add_input(Dir::R);
    input.write_msg(Msg::new(MsgType::UPDATE)).await.unwrap();
    input.write_msg(Msg::keepalive()).await.unwrap();

    p.pipe().stream(Dir::L).close_input();
    p.pipe().stream(Dir::R).close_input();
    p.pipe().wait().await;

    let seen = log.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].typ(), MsgType::KEEPALIVE);
}

// ============================================================================
// Speaker handshake
// ============================================================================

#[tokio::test]
async fn test_two_speakers_establish_a_session() {
    let mut p = pipeline(&["--silent", "speaker", "--", "speaker", "--asn", "65001"]);
    p.attach().unwrap();
    let log_r = observe(&p, Dir::R);
    let log_l = observe(&p, Dir::L);

    let established = Arc::new(AtomicBool::new(false));
    let hit = established.clone();
    p.pipe().events.on_event_pre(
        vec![bgpipe_pipe::EVENT_ESTABLISHED.to_string()],
        0,
        move |_| {
            hit.store(true, Ordering::Relaxed);
            true
        },
    );

    p.start().await;

    eventually("OPEN in both directions", || {
        let opens = |log: &Arc<Mutex<Vec<Msg>>>| {
            log.lock().iter().any(|m| m.typ() == MsgType::OPEN)
        };
        opens(&log_r) && opens(&log_l)
    })
    .await;
    eventually("keepalives", || {
        log_r
            .lock()
            .iter()
            .any(|m| m.typ() == MsgType::KEEPALIVE)
    })
    .await;
    eventually("session up", || established.load(Ordering::Relaxed)).await;

    p.cancel_cause().cancel_clean();
    p.wait().await.unwrap();
}
