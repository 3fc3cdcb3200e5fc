//! The duplex pipe: both streams, the event bus, shared session state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use bgpipe_msg::{Caps, Dir, MsgType};

use crate::callback::{Callback, MsgHandler};
use crate::event::{EventBus, EVENT_ESTABLISHED, EVENT_STOP};
use crate::input::Input;
use crate::stream::Stream;

/// Session observations shared by both pumps.
///
/// Tracks OPEN sightings per direction and publishes `ESTABLISHED` exactly
/// once when both have been seen.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    open_l: AtomicBool,
    open_r: AtomicBool,
    established: AtomicBool,
}

impl SessionState {
    pub(crate) async fn saw_open(&self, dir: Dir, events: &EventBus) {
        match dir {
            Dir::L => self.open_l.store(true, Ordering::Relaxed),
            Dir::R => self.open_r.store(true, Ordering::Relaxed),
        }

        if self.open_l.load(Ordering::Relaxed)
            && self.open_r.load(Ordering::Relaxed)
            && !self.established.swap(true, Ordering::Relaxed)
        {
            debug!("session established");
            events.publish_type(EVENT_ESTABLISHED).await;
        }
    }
}

/// Both directional streams plus the event bus.
///
/// Owns the pump and dispatch tasks once [`Pipe::start`] runs; [`Pipe::wait`]
/// joins them after the stream sides have been closed by their owners.
pub struct Pipe {
    l: Arc<Stream>,
    r: Arc<Stream>,

    /// The event bus; stages publish, handlers subscribe
    pub events: Arc<EventBus>,

    /// Session capabilities consulted by the wire marshaller
    pub caps: RwLock<Caps>,

    session: Arc<SessionState>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipe {
    pub fn new() -> Self {
        Self {
            l: Arc::new(Stream::new(Dir::L)),
            r: Arc::new(Stream::new(Dir::R)),
            events: Arc::new(EventBus::new()),
            caps: RwLock::new(Caps::default()),
            session: Arc::new(SessionState::default()),
            pumps: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Stream for the given direction
    #[inline]
    pub fn stream(&self, dir: Dir) -> &Arc<Stream> {
        match dir {
            Dir::L => &self.l,
            Dir::R => &self.r,
        }
    }

    /// Register an injection handle on the given direction
    pub fn add_input(&self, dir: Dir) -> Arc<Input> {
        self.stream(dir).add_input()
    }

    /// Register a message callback on the given direction
    pub fn on_msg(
        &self,
        dir: Dir,
        handler: Box<dyn MsgHandler>,
        types: Vec<MsgType>,
    ) -> Arc<Callback> {
        self.stream(dir).on_msg(handler, types)
    }

    /// Spawn the event dispatcher and both stream pumps. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::Relaxed) {
            return;
        }

        *self.dispatcher.lock() = Some(tokio::spawn(self.events.clone().dispatch()));

        let mut pumps = self.pumps.lock();
        for stream in [&self.l, &self.r] {
            pumps.push(tokio::spawn(stream.clone().pump(
                self.events.clone(),
                self.session.clone(),
            )));
        }
    }

    /// Wait for both pumps to finish, then publish `STOP` and drain the bus.
    pub async fn wait(&self) {
        let pumps: Vec<_> = self.pumps.lock().drain(..).collect();
        for pump in pumps {
            let _ = pump.await;
        }

        self.events.publish_type(EVENT_STOP).await;
        self.events.close();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.await;
        }
    }
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("l", &self.l)
            .field("r", &self.r)
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}
