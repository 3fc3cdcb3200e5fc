//! Event bus tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::fq_event;
use crate::{Event, EventBus};

async fn run_bus(bus: Arc<EventBus>, events: &[&str]) {
    let dispatcher = tokio::spawn(bus.clone().dispatch());
    for typ in events {
        assert!(bus.publish_type(typ).await);
    }
    bus.close();
    dispatcher.await.unwrap();
}

#[test]
fn test_event_name_completion() {
    assert_eq!(fq_event("START"), "bgpipe/pipe.START");
    assert_eq!(fq_event("established"), "bgpipe/pipe.ESTABLISHED");
    assert_eq!(fq_event("speaker.ESTABLISHED"), "bgpipe/speaker.ESTABLISHED");
    assert_eq!(fq_event("other/lib.EVENT"), "other/lib.EVENT");
}

#[tokio::test]
async fn test_pre_runs_before_post_in_priority_order() {
    let bus = Arc::new(EventBus::new());
    let order: Arc<Mutex<Vec<&'static str>>> = Default::default();

    for (name, pre, prio) in [
        ("post-10", false, 10),
        ("pre-5", true, 5),
        ("post-0", false, 0),
        ("pre-min", true, i64::MIN),
    ] {
        let log = order.clone();
        let func = move |_: &Event| {
            log.lock().push(name);
            true
        };
        if pre {
            bus.on_event_pre(vec![], prio, func);
        } else {
            bus.on_event_post(vec![], prio, func);
        }
    }

    run_bus(bus, &["START"]).await;
    assert_eq!(*order.lock(), vec!["pre-min", "pre-5", "post-0", "post-10"]);
}

#[tokio::test]
async fn test_type_matching_and_short_names() {
    let bus = Arc::new(EventBus::new());
    let hits = Arc::new(AtomicUsize::new(0));

    let n = hits.clone();
    bus.on_event_pre(vec![fq_event("ESTABLISHED")], 0, move |_| {
        n.fetch_add(1, Ordering::Relaxed);
        true
    });

    run_bus(bus, &["START", "established", "STOP"]).await;
    assert_eq!(hits.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_empty_type_list_matches_all() {
    let bus = Arc::new(EventBus::new());
    let hits = Arc::new(AtomicUsize::new(0));

    let n = hits.clone();
    bus.on_event_pre(vec![], 0, move |_| {
        n.fetch_add(1, Ordering::Relaxed);
        true
    });

    run_bus(bus, &["START", "STOP", "custom.EVENT"]).await;
    assert_eq!(hits.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn test_one_shot_handler_unregisters() {
    let bus = Arc::new(EventBus::new());
    let hits = Arc::new(AtomicUsize::new(0));

    let n = hits.clone();
    bus.on_event_pre(vec![], 0, move |_| {
        n.fetch_add(1, Ordering::Relaxed);
        false
    });

    run_bus(bus, &["START", "STOP"]).await;
    assert_eq!(hits.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_disabled_handler_is_skipped() {
    let bus = Arc::new(EventBus::new());
    let hits = Arc::new(AtomicUsize::new(0));

    let n = hits.clone();
    let handler = bus.on_event_pre(vec![], 0, move |_| {
        n.fetch_add(1, Ordering::Relaxed);
        true
    });
    handler.bind_enabled(Arc::new(AtomicBool::new(false)));

    run_bus(bus, &["START"]).await;
    assert_eq!(hits.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_publish_after_close_fails_but_queued_events_drain() {
    let bus = Arc::new(EventBus::new());
    let hits = Arc::new(AtomicUsize::new(0));

    let n = hits.clone();
    bus.on_event_pre(vec![], 0, move |_| {
        n.fetch_add(1, Ordering::Relaxed);
        true
    });

    // queue before the dispatcher even starts
    assert!(bus.publish_type("START").await);
    bus.close();
    assert!(!bus.publish_type("STOP").await);

    bus.clone().dispatch().await;
    assert_eq!(hits.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_event_seq_is_assigned() {
    let bus = Arc::new(EventBus::new());
    let seqs: Arc<Mutex<Vec<u64>>> = Default::default();

    let log = seqs.clone();
    bus.on_event_pre(vec![], 0, move |ev| {
        log.lock().push(ev.seq);
        true
    });

    run_bus(bus, &["START", "STOP"]).await;
    assert_eq!(*seqs.lock(), vec![1, 2]);
}
