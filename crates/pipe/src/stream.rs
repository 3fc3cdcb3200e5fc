//! One directional message stream

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use bgpipe_msg::{Dir, MsgType};

use crate::callback::{Callback, MsgHandler};
use crate::input::{Envelope, Input};
use crate::pipe::SessionState;
use crate::{EventBus, STREAM_QUEUE_SIZE};

/// Stream counters
#[derive(Debug, Default)]
pub struct StreamMetrics {
    /// Messages handed to the callback chain
    pub delivered: AtomicU64,

    /// Messages hijacked mid-chain by an action drop
    pub dropped: AtomicU64,

    /// Messages discarded because the output side was already closed
    pub discarded: AtomicU64,
}

impl StreamMetrics {
    pub fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of stream counters
#[derive(Debug, Clone, Copy)]
pub struct StreamMetricsSnapshot {
    pub delivered: u64,
    pub dropped: u64,
    pub discarded: u64,
}

/// Ordered, flow-controlled conveyor of messages in one logical direction.
///
/// Inputs inject, callbacks observe; a single pump task routes each message
/// through the callbacks that pass its position filter, in registration
/// order, assigning monotonic per-direction sequence numbers along the way.
pub struct Stream {
    dir: Dir,
    seq: AtomicU64,
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    callbacks: Mutex<Vec<Arc<Callback>>>,
    input_close: CancellationToken,
    output_closed: AtomicBool,
    done: CancellationToken,
    metrics: StreamMetrics,
}

impl Stream {
    pub(crate) fn new(dir: Dir) -> Self {
        let (tx, rx) = mpsc::channel(STREAM_QUEUE_SIZE);
        Self {
            dir,
            seq: AtomicU64::new(0),
            tx,
            rx: Mutex::new(Some(rx)),
            callbacks: Mutex::new(Vec::new()),
            input_close: CancellationToken::new(),
            output_closed: AtomicBool::new(false),
            done: CancellationToken::new(),
            metrics: StreamMetrics::default(),
        }
    }

    /// Stream direction
    #[inline]
    pub fn dir(&self) -> Dir {
        self.dir
    }

    /// Stream counters
    #[inline]
    pub fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }

    /// Register a new injection handle
    pub fn add_input(&self) -> Arc<Input> {
        Arc::new(Input::new(self.dir, self.tx.clone()))
    }

    /// Register a callback observing this stream.
    ///
    /// An empty type list observes everything. Callbacks run in registration
    /// order; the stage index and enabled binding are stamped at attach.
    pub fn on_msg(&self, handler: Box<dyn MsgHandler>, types: Vec<MsgType>) -> Arc<Callback> {
        let cb = Arc::new(Callback::new(self.dir, types, handler));
        self.callbacks.lock().push(cb.clone());
        cb
    }

    /// Number of live (not dropped) callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().iter().filter(|c| !c.is_dropped()).count()
    }

    /// Close the injection side: pending messages still drain, new writes
    /// fail. Idempotent.
    pub fn close_input(&self) {
        if !self.input_close.is_cancelled() {
            debug!(dir = %self.dir, "closing stream input");
        }
        self.input_close.cancel();
    }

    /// Close the observation side: remaining messages are discarded without
    /// running callbacks. Idempotent.
    pub fn close_output(&self) {
        if !self.output_closed.swap(true, Ordering::Relaxed) {
            debug!(dir = %self.dir, "closing stream output");
        }
    }

    /// Whether the output side is closed
    pub fn is_output_closed(&self) -> bool {
        self.output_closed.load(Ordering::Relaxed)
    }

    /// Token cancelled once the pump has delivered its last message.
    ///
    /// After it fires, no callback on this stream will run again; writer
    /// stages use it to drain and close their egress.
    pub fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Whether the pump has finished
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Run the delivery loop until the input side is closed and drained.
    pub(crate) async fn pump(self: Arc<Self>, events: Arc<EventBus>, session: Arc<SessionState>) {
        let mut rx = match self.rx.lock().take() {
            Some(rx) => rx,
            None => return, // already pumping
        };

        let mut draining = false;
        loop {
            tokio::select! {
                biased;
                _ = self.input_close.cancelled(), if !draining => {
                    rx.close();
                    draining = true;
                }
                env = rx.recv() => match env {
                    Some(env) => self.deliver(env, &events, &session).await,
                    None => break,
                },
            }
        }

        self.done.cancel();
        let snapshot = self.metrics.snapshot();
        debug!(
            dir = %self.dir,
            delivered = snapshot.delivered,
            dropped = snapshot.dropped,
            discarded = snapshot.discarded,
            "stream pump finished"
        );
    }

    async fn deliver(&self, env: Envelope, events: &EventBus, session: &SessionState) {
        let Envelope {
            mut msg,
            mode,
            filter_id,
        } = env;

        // a fresh message gets the next per-direction seq; a re-injected one
        // keeps what it has
        if msg.seq() == 0 {
            msg.set_seq(self.seq.fetch_add(1, Ordering::Relaxed) + 1);
        }

        if msg.typ() == MsgType::OPEN {
            session.saw_open(self.dir, events).await;
        }

        if self.output_closed.load(Ordering::Relaxed) {
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.metrics.delivered.fetch_add(1, Ordering::Relaxed);

        let callbacks = self.callbacks.lock().clone();
        let mut prune = false;
        for cb in &callbacks {
            if cb.is_dropped() {
                prune = true;
                continue;
            }
            if !cb.is_enabled() || !cb.wants(msg.typ()) {
                continue;
            }
            if mode.skips(cb.id(), filter_id) {
                trace!(dir = %self.dir, cb = cb.id(), seq = msg.seq(), "position filter skip");
                continue;
            }

            if !cb.handler.on_msg(&mut msg).await {
                cb.drop_cb();
                prune = true;
            }

            if msg.ctx.action.is_drop() {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }

        if prune {
            self.callbacks.lock().retain(|c| !c.is_dropped());
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("dir", &self.dir)
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .field("output_closed", &self.is_output_closed())
            .finish()
    }
}
