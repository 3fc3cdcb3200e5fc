//! Stream delivery tests
//!
//! Sequence assignment, ordering, position filters, action drops and the
//! close discipline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use bgpipe_msg::{Dir, Msg, MsgType};

use crate::{Event, FilterMode, FnHandler, Pipe, PipeError};

/// Record of one observed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
struct Seen {
    cb: usize,
    seq: u64,
    tag: String,
}

type Log = Arc<Mutex<Vec<Seen>>>;

/// Register a collecting callback under the given stage id
fn collector(pipe: &Pipe, dir: Dir, cb_id: usize, log: &Log) {
    let log = log.clone();
    let cb = pipe.on_msg(
        dir,
        Box::new(FnHandler(move |m: &mut Msg| {
            log.lock().push(Seen {
                cb: cb_id,
                seq: m.seq(),
                tag: m.tags.get("n").cloned().unwrap_or_default(),
            });
            true
        })),
        vec![],
    );
    cb.set_id(cb_id);
}

fn tagged(n: usize) -> Msg {
    let mut m = Msg::keepalive();
    m.tags.insert("n".into(), n.to_string());
    m
}

async fn shutdown(pipe: &Pipe) {
    pipe.stream(Dir::L).close_input();
    pipe.stream(Dir::R).close_input();
    pipe.wait().await;
}

// ============================================================================
// Sequencing and ordering
// ============================================================================

#[tokio::test]
async fn test_monotonic_seq_and_fifo_order() {
    let pipe = Pipe::new();
    let log: Log = Default::default();
    collector(&pipe, Dir::R, 1, &log);

    let input = pipe.add_input(Dir::R);
    pipe.start();
    for n in 0..5 {
        input.write_msg(tagged(n)).await.unwrap();
    }
    shutdown(&pipe).await;

    let seen = log.lock().clone();
    assert_eq!(seen.len(), 5);
    for (i, s) in seen.iter().enumerate() {
        assert_eq!(s.seq, i as u64 + 1, "strictly increasing from 1");
        assert_eq!(s.tag, i.to_string(), "order preserved");
    }
}

#[tokio::test]
async fn test_directions_count_independently() {
    let pipe = Pipe::new();
    let log: Log = Default::default();
    collector(&pipe, Dir::L, 1, &log);
    collector(&pipe, Dir::R, 1, &log);

    let il = pipe.add_input(Dir::L);
    let ir = pipe.add_input(Dir::R);
    pipe.start();
    il.write_msg(tagged(0)).await.unwrap();
    ir.write_msg(tagged(1)).await.unwrap();
    shutdown(&pipe).await;

    // both start at 1: per-direction counters
    let seen = log.lock().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|s| s.seq == 1));
}

#[tokio::test]
async fn test_preassigned_seq_is_kept() {
    let pipe = Pipe::new();
    let log: Log = Default::default();
    collector(&pipe, Dir::R, 1, &log);

    let input = pipe.add_input(Dir::R);
    pipe.start();

    let mut m = tagged(0);
    m.set_seq(99);
    input.write_msg(m).await.unwrap();
    input.write_msg(tagged(1)).await.unwrap();
    shutdown(&pipe).await;

    let seen = log.lock().clone();
    assert_eq!(seen[0].seq, 99);
    assert_eq!(seen[1].seq, 1, "counter unaffected by kept seq");
}

// ============================================================================
// Position filters
// ============================================================================

async fn filter_run(mode: FilterMode, filter_id: usize) -> Vec<usize> {
    let pipe = Pipe::new();
    let log: Log = Default::default();
    for cb_id in 1..=3 {
        collector(&pipe, Dir::R, cb_id, &log);
    }

    let input = pipe.add_input(Dir::R);
    input.set_filter(mode, filter_id, false);
    pipe.start();
    input.write_msg(tagged(0)).await.unwrap();
    shutdown(&pipe).await;

    let seen: Vec<usize> = log.lock().iter().map(|s| s.cb).collect();
    seen
}

#[tokio::test]
async fn test_filter_next_semantics() {
    // stage 2 injecting with "next": skip <= 2, deliver beyond
    assert_eq!(filter_run(FilterMode::Le, 2).await, vec![3]);
}

#[tokio::test]
async fn test_filter_here_semantics() {
    // stage 2 injecting with "here": skip < 2, deliver from itself on
    assert_eq!(filter_run(FilterMode::Lt, 2).await, vec![2, 3]);
}

#[tokio::test]
async fn test_filter_first_and_last() {
    assert_eq!(filter_run(FilterMode::None, 0).await, vec![1, 2, 3]);
    assert_eq!(filter_run(FilterMode::All, 0).await, Vec::<usize>::new());
}

#[tokio::test]
async fn test_filter_reverse_direction_modes() {
    // L inputs get the flipped comparisons: Ge for "next", Gt for "here"
    assert_eq!(filter_run(FilterMode::Ge, 2).await, vec![1]);
    assert_eq!(filter_run(FilterMode::Gt, 2).await, vec![1, 2]);
}

#[tokio::test]
async fn test_internal_callbacks_bypass_filters() {
    let pipe = Pipe::new();
    let log: Log = Default::default();
    collector(&pipe, Dir::R, 0, &log); // auto-stage observer

    let input = pipe.add_input(Dir::R);
    input.set_filter(FilterMode::All, 0, false);
    pipe.start();
    input.write_msg(tagged(0)).await.unwrap();
    shutdown(&pipe).await;

    assert_eq!(log.lock().len(), 1, "stage-0 callback still sees the message");
}

// ============================================================================
// Drops, type masks, enable gating
// ============================================================================

#[tokio::test]
async fn test_action_drop_stops_the_chain_but_consumes_seq() {
    let pipe = Pipe::new();
    let log: Log = Default::default();

    let dropper = pipe.on_msg(
        Dir::R,
        Box::new(FnHandler(|m: &mut Msg| {
            if m.tags.contains_key("drop") {
                m.ctx.action.drop();
            }
            true
        })),
        vec![],
    );
    dropper.set_id(1);
    collector(&pipe, Dir::R, 2, &log);

    let input = pipe.add_input(Dir::R);
    pipe.start();

    let mut doomed = tagged(0);
    doomed.tags.insert("drop".into(), "1".into());
    input.write_msg(doomed).await.unwrap();
    input.write_msg(tagged(1)).await.unwrap();
    shutdown(&pipe).await;

    let seen = log.lock().clone();
    assert_eq!(seen.len(), 1, "later callback never sees the dropped message");
    assert_eq!(seen[0].seq, 2, "the dropped message still consumed seq 1");
    assert_eq!(pipe.stream(Dir::R).metrics().snapshot().dropped, 1);
}

#[tokio::test]
async fn test_type_mask() {
    let pipe = Pipe::new();
    let count = Arc::new(AtomicUsize::new(0));
    let n = count.clone();
    pipe.on_msg(
        Dir::R,
        Box::new(FnHandler(move |_: &mut Msg| {
            n.fetch_add(1, Ordering::Relaxed);
            true
        })),
        vec![MsgType::UPDATE],
    );

    let input = pipe.add_input(Dir::R);
    pipe.start();
    input.write_msg(Msg::keepalive()).await.unwrap();
    input.write_msg(Msg::new(MsgType::UPDATE)).await.unwrap();
    shutdown(&pipe).await;

    assert_eq!(count.load(Ordering::Relaxed), 1);
}

async fn gated_run(running: bool) -> usize {
    let pipe = Pipe::new();
    let count = Arc::new(AtomicUsize::new(0));
    let n = count.clone();
    let cb = pipe.on_msg(
        Dir::R,
        Box::new(FnHandler(move |_: &mut Msg| {
            n.fetch_add(1, Ordering::Relaxed);
            true
        })),
        vec![],
    );
    cb.bind_enabled(Arc::new(AtomicBool::new(running)));

    let input = pipe.add_input(Dir::R);
    pipe.start();
    input.write_msg(Msg::keepalive()).await.unwrap();
    shutdown(&pipe).await;

    count.load(Ordering::Relaxed)
}

#[tokio::test]
async fn test_enabled_binding_gates_delivery() {
    assert_eq!(gated_run(false).await, 0, "stopped stage sees nothing");
    assert_eq!(gated_run(true).await, 1, "running stage sees the message");
}

#[tokio::test]
async fn test_handler_self_removal() {
    let pipe = Pipe::new();
    let count = Arc::new(AtomicUsize::new(0));
    let n = count.clone();
    pipe.on_msg(
        Dir::R,
        Box::new(FnHandler(move |_: &mut Msg| {
            n.fetch_add(1, Ordering::Relaxed);
            false // run once, then unregister
        })),
        vec![],
    );

    let input = pipe.add_input(Dir::R);
    pipe.start();
    input.write_msg(Msg::keepalive()).await.unwrap();
    input.write_msg(Msg::keepalive()).await.unwrap();
    shutdown(&pipe).await;

    assert_eq!(count.load(Ordering::Relaxed), 1);
    assert_eq!(pipe.stream(Dir::R).callback_count(), 0);
}

// ============================================================================
// Close discipline
// ============================================================================

#[tokio::test]
async fn test_close_input_drains_then_rejects() {
    let pipe = Pipe::new();
    let log: Log = Default::default();
    collector(&pipe, Dir::R, 1, &log);

    let input = pipe.add_input(Dir::R);
    pipe.start();
    input.write_msg(tagged(0)).await.unwrap();

    pipe.stream(Dir::R).close_input();
    pipe.stream(Dir::R).close_input(); // idempotent
    pipe.stream(Dir::L).close_input();
    pipe.wait().await;

    assert_eq!(log.lock().len(), 1, "queued message drained before exit");
    assert!(matches!(
        input.write_msg(tagged(1)).await,
        Err(PipeError::InputClosed)
    ));
}

#[tokio::test]
async fn test_close_output_discards_without_callbacks() {
    let pipe = Pipe::new();
    let log: Log = Default::default();
    collector(&pipe, Dir::R, 1, &log);

    let input = pipe.add_input(Dir::R);
    pipe.stream(Dir::R).close_output();
    pipe.start();
    input.write_msg(tagged(0)).await.unwrap();
    shutdown(&pipe).await;

    assert!(log.lock().is_empty());
    assert_eq!(pipe.stream(Dir::R).metrics().snapshot().discarded, 1);
}

#[tokio::test]
async fn test_closed_input_handle_rejects_writes() {
    let pipe = Pipe::new();
    let input = pipe.add_input(Dir::R);
    input.close();
    assert!(matches!(
        input.write_msg(Msg::keepalive()).await,
        Err(PipeError::InputClosed)
    ));
}

// ============================================================================
// Framed writes and session tracking
// ============================================================================

#[tokio::test]
async fn test_write_func_consumes_whole_frames_only() {
    let pipe = Pipe::new();
    let log: Log = Default::default();
    collector(&pipe, Dir::R, 1, &log);

    let input = pipe.add_input(Dir::R);
    pipe.start();

    let mut frame = Vec::new();
    frame.extend_from_slice(&[0xff; 16]);
    frame.extend_from_slice(&19u16.to_be_bytes());
    frame.push(4);
    let full = frame.len();
    let partial = frame[..10].to_vec(); // half of a second frame
    frame.extend_from_slice(&partial);

    let consumed = input.write_func(&frame, |_| true).await.unwrap();
    assert_eq!(consumed, full);
    shutdown(&pipe).await;
    assert_eq!(log.lock().len(), 1);
}

#[tokio::test]
async fn test_established_after_open_in_both_directions() {
    let pipe = Pipe::new();
    let established = Arc::new(AtomicUsize::new(0));
    let hits = established.clone();
    pipe.events.on_event_pre(
        vec![crate::EVENT_ESTABLISHED.to_string()],
        0,
        move |_: &Event| {
            hits.fetch_add(1, Ordering::Relaxed);
            true
        },
    );

    let il = pipe.add_input(Dir::L);
    let ir = pipe.add_input(Dir::R);
    pipe.start();

    ir.write_msg(Msg::new(MsgType::OPEN)).await.unwrap();
    il.write_msg(Msg::new(MsgType::OPEN)).await.unwrap();
    // a second OPEN must not re-fire the event
    ir.write_msg(Msg::new(MsgType::OPEN)).await.unwrap();
    shutdown(&pipe).await;

    assert_eq!(established.load(Ordering::Relaxed), 1);
}
