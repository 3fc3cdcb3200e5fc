//! In-process pub/sub for named events

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use bgpipe_msg::Msg;

use crate::sync::ClosableSender;
use crate::EVENT_QUEUE_SIZE;

/// Fired once when the pipeline starts
pub const EVENT_START: &str = "bgpipe/pipe.START";

/// Fired once when both streams have finished
pub const EVENT_STOP: &str = "bgpipe/pipe.STOP";

/// Fired once when an OPEN has passed in both directions
pub const EVENT_ESTABLISHED: &str = "bgpipe/pipe.ESTABLISHED";

/// Expand a possibly-short event name to its `lib/package.NAME` form.
///
/// `NAME` completes to `bgpipe/pipe.NAME`, `pkg.NAME` to `bgpipe/pkg.NAME`,
/// fully qualified names pass through.
pub fn fq_event(name: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else if name.contains('.') {
        format!("bgpipe/{name}")
    } else {
        format!("bgpipe/pipe.{}", name.to_ascii_uppercase())
    }
}

/// One published event
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Namespaced type, e.g. `bgpipe/pipe.START`
    pub typ: String,

    /// Bus-assigned publication number
    pub seq: u64,

    /// Message that triggered the event, if any
    pub msg: Option<Msg>,

    /// Rendered error, if any
    pub error: Option<String>,

    /// Free-form payload
    pub value: Option<serde_json::Value>,
}

impl Event {
    /// Event of the given (possibly short) type with no payload
    pub fn new(typ: &str) -> Self {
        Self {
            typ: fq_event(typ),
            ..Default::default()
        }
    }

    /// Attach a free-form value
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Attach an error rendering
    pub fn with_error(mut self, error: &dyn std::error::Error) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

type HandlerFunc = Box<dyn Fn(&Event) -> bool + Send + Sync>;

/// One registered event handler.
///
/// Pre handlers run before post handlers, each group ordered by ascending
/// `order`. Returning `false` from the function unregisters the handler.
pub struct Handler {
    id: AtomicUsize,
    pre: bool,
    order: i64,
    types: Vec<String>,
    enabled: Mutex<Option<Arc<AtomicBool>>>,
    dropped: AtomicBool,
    func: HandlerFunc,
}

impl Handler {
    /// Owning stage index (0 for internal handlers)
    #[inline]
    pub fn id(&self) -> usize {
        self.id.load(Ordering::Relaxed)
    }

    /// Stamp the owning stage index (attach time)
    pub fn set_id(&self, id: usize) {
        self.id.store(id, Ordering::Relaxed);
    }

    /// Bind the enabled flag to the owning stage's running state
    pub fn bind_enabled(&self, flag: Arc<AtomicBool>) {
        *self.enabled.lock() = Some(flag);
    }

    /// Unregister this handler
    pub fn drop_handler(&self) {
        self.dropped.store(true, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        match self.enabled.lock().as_ref() {
            Some(flag) => flag.load(Ordering::Relaxed),
            None => true,
        }
    }

    fn matches(&self, typ: &str) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t == typ)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id())
            .field("pre", &self.pre)
            .field("order", &self.order)
            .field("types", &self.types)
            .finish()
    }
}

/// The event bus: bounded queue in, ordered handler dispatch out.
///
/// Publication never blocks pipeline shutdown: once closed, `publish`
/// returns `false` and already-queued events still dispatch.
pub struct EventBus {
    tx: ClosableSender<Event>,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    handlers: Mutex<Vec<Arc<Handler>>>,
    seq: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = ClosableSender::new(EVENT_QUEUE_SIZE);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handlers: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Register a pre handler for the given (already qualified) event types.
    /// An empty list matches every event. Lower `order` runs earlier.
    pub fn on_event_pre<F>(&self, types: Vec<String>, order: i64, func: F) -> Arc<Handler>
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.add_handler(true, types, order, Box::new(func))
    }

    /// Register a post handler; see [`EventBus::on_event_pre`]
    pub fn on_event_post<F>(&self, types: Vec<String>, order: i64, func: F) -> Arc<Handler>
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.add_handler(false, types, order, Box::new(func))
    }

    fn add_handler(
        &self,
        pre: bool,
        types: Vec<String>,
        order: i64,
        func: HandlerFunc,
    ) -> Arc<Handler> {
        let handler = Arc::new(Handler {
            id: AtomicUsize::new(0),
            pre,
            order,
            types,
            enabled: Mutex::new(None),
            dropped: AtomicBool::new(false),
            func,
        });
        self.handlers.lock().push(handler.clone());
        handler
    }

    /// Publish an event. Returns `false` once the bus is closed.
    pub async fn publish(&self, mut event: Event) -> bool {
        event.seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.tx.send(event).await
    }

    /// Publish an empty event of the given (possibly short) type
    pub async fn publish_type(&self, typ: &str) -> bool {
        self.publish(Event::new(typ)).await
    }

    /// Close the bus; queued events still dispatch, later publishes fail
    pub fn close(&self) {
        self.tx.close();
    }

    /// Run the dispatch loop until the bus is closed and drained.
    pub(crate) async fn dispatch(self: Arc<Self>) {
        let mut rx = match self.rx.lock().take() {
            Some(rx) => rx,
            None => return, // already dispatching
        };

        while let Some(event) = rx.recv().await {
            self.dispatch_one(&event);
        }
        debug!("event dispatch finished");
    }

    fn dispatch_one(&self, event: &Event) {
        let mut matching: Vec<Arc<Handler>> = self
            .handlers
            .lock()
            .iter()
            .filter(|h| !h.dropped.load(Ordering::Relaxed) && h.matches(&event.typ))
            .cloned()
            .collect();

        // pre handlers first, then post; ascending order within each group
        matching.sort_by_key(|h| (!h.pre, h.order));

        let mut prune = false;
        for handler in &matching {
            if !handler.is_enabled() {
                continue;
            }
            if !(handler.func)(event) {
                handler.drop_handler();
                prune = true;
            }
        }

        if prune {
            self.handlers
                .lock()
                .retain(|h| !h.dropped.load(Ordering::Relaxed));
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.lock().len())
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .finish()
    }
}
