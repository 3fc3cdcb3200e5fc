//! The stage contract and the base every stage builds on

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use bgpipe_msg::{Dir, MsgType};
use bgpipe_pipe::{Callback, Event, EventBus, Handler, Input, MsgHandler, Pipe, Stream};

use crate::pipeline::Shared;
use crate::{Result, StageConfig};

/// Shared handle to a stage's base state
pub type StageRef = Arc<StageBase>;

/// Static properties a stage declares about itself
#[derive(Debug, Clone, Copy, Default)]
pub struct StageOptions {
    /// One-line description for the usage screen
    pub descr: &'static str,

    /// Names of required positional arguments, in order
    pub args: &'static [&'static str],

    /// Take every remaining positional token instead of named arguments
    pub args_rest: bool,

    /// May operate in both directions at once
    pub bidir: bool,

    /// Produces messages into the pipeline
    pub is_producer: bool,

    /// Consumes messages from the pipeline (must be first or last)
    pub is_consumer: bool,

    /// Reads the process standard input
    pub is_stdin: bool,

    /// Writes the process standard output
    pub is_stdout: bool,
}

/// A concrete stage: registration in `attach`, work in `run`.
///
/// `attach` is called once, after positions and directions are resolved, and
/// must register every input/callback/handler the stage will use. `run` is
/// invoked when the stage's start event fires and should return when the
/// work is done or the stop token fires.
#[async_trait]
pub trait Stage: Send {
    fn attach(&mut self, base: &StageRef) -> Result<()>;

    async fn run(&mut self, base: StageRef) -> Result<()>;
}

/// Which stream sides this stage participates on, derived from its
/// registered inputs (writes) and callbacks (reads)
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WgMask {
    pub write_l: bool,
    pub read_l: bool,
    pub write_r: bool,
    pub read_r: bool,
}

/// Everything the pipeline knows about one stage.
///
/// Stages receive an `Arc` of this; all mutable state is atomics or mutexes
/// because event handlers and the pipeline share the same handle.
pub struct StageBase {
    /// Command name this stage was created under
    pub cmd: String,

    /// Static stage properties
    pub options: StageOptions,

    alias: Mutex<Option<String>>,
    index: AtomicUsize,

    is_first: AtomicBool,
    is_last: AtomicBool,
    is_left: AtomicBool,
    is_right: AtomicBool,

    /// Eligible to start (false while gated on a wait event)
    enabled: AtomicBool,

    /// True exactly while `run` executes; callbacks gate on this
    running: Arc<AtomicBool>,

    /// Guards against double start
    pub(crate) started: AtomicBool,

    cfg: Mutex<StageConfig>,
    inputs: Mutex<Vec<Arc<Input>>>,
    callbacks: Mutex<Vec<Arc<Callback>>>,
    handlers: Mutex<Vec<Arc<Handler>>>,
    wg_mask: Mutex<WgMask>,

    stop_token: CancellationToken,

    pub(crate) runner: Mutex<Option<Box<dyn Stage>>>,
    pub(crate) shared: Arc<Shared>,
}

impl StageBase {
    pub(crate) fn new(
        cmd: String,
        options: StageOptions,
        runner: Box<dyn Stage>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            cmd,
            options,
            alias: Mutex::new(None),
            index: AtomicUsize::new(0),
            is_first: AtomicBool::new(false),
            is_last: AtomicBool::new(false),
            is_left: AtomicBool::new(false),
            is_right: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            cfg: Mutex::new(StageConfig::default()),
            inputs: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            wg_mask: Mutex::new(WgMask::default()),
            stop_token: shared.cancel.token().child_token(),
            runner: Mutex::new(Some(runner)),
            shared,
        }
    }

    // ------------------------------------------------------------------
    // Identity and position
    // ------------------------------------------------------------------

    /// 1-based chain position; 0 for internal auto-stages
    #[inline]
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    /// Stage name: the `@alias` if one was given, else the command
    pub fn name(&self) -> String {
        self.alias
            .lock()
            .clone()
            .unwrap_or_else(|| self.cmd.clone())
    }

    pub(crate) fn set_alias(&self, alias: Option<String>) {
        *self.alias.lock() = alias;
    }

    /// Tracing span carrying the stage identity
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("stage", idx = self.index(), name = %self.name())
    }

    #[inline]
    pub fn is_first(&self) -> bool {
        self.is_first.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.is_last.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_left(&self) -> bool {
        self.is_left.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_right(&self) -> bool {
        self.is_right.load(Ordering::Relaxed)
    }

    /// Active in both directions at once
    #[inline]
    pub fn is_bidir(&self) -> bool {
        self.is_left() && self.is_right()
    }

    pub(crate) fn set_position(&self, first: bool, last: bool) {
        self.is_first.store(first, Ordering::Relaxed);
        self.is_last.store(last, Ordering::Relaxed);
    }

    pub(crate) fn set_directions(&self, left: bool, right: bool) {
        self.is_left.store(left, Ordering::Relaxed);
        self.is_right.store(right, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Snapshot of the parsed per-stage configuration
    pub fn cfg(&self) -> StageConfig {
        self.cfg.lock().clone()
    }

    pub(crate) fn set_cfg(&self, cfg: StageConfig) {
        *self.cfg.lock() = cfg;
    }

    pub(crate) fn with_cfg<R>(&self, f: impl FnOnce(&mut StageConfig) -> R) -> R {
        f(&mut self.cfg.lock())
    }

    // ------------------------------------------------------------------
    // Pipeline access
    // ------------------------------------------------------------------

    /// The duplex pipe
    #[inline]
    pub fn pipe(&self) -> &Pipe {
        &self.shared.pipe
    }

    /// The event bus
    #[inline]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.pipe.events
    }

    /// The stream this stage produces into (for unidirectional stages)
    pub fn upstream(&self) -> Arc<Stream> {
        let dir = if self.is_left() { Dir::L } else { Dir::R };
        self.shared.pipe.stream(dir).clone()
    }

    /// The stream this stage consumes from (for unidirectional stages)
    pub fn downstream(&self) -> Arc<Stream> {
        let dir = if self.is_left() { Dir::R } else { Dir::L };
        self.shared.pipe.stream(dir).clone()
    }

    /// Register an injection handle; the pipeline stamps its id and
    /// position filter after `attach` returns
    pub fn add_input(&self, dir: Dir) -> Arc<Input> {
        let input = self.shared.pipe.add_input(dir);
        self.inputs.lock().push(input.clone());
        input
    }

    /// Register a message callback on the given direction
    pub fn on_msg(
        &self,
        dir: Dir,
        handler: Box<dyn MsgHandler>,
        types: Vec<MsgType>,
    ) -> Arc<Callback> {
        let cb = self.shared.pipe.on_msg(dir, handler, types);
        self.callbacks.lock().push(cb.clone());
        cb
    }

    /// Register a pre event handler owned by this stage
    pub fn on_event_pre<F>(&self, types: Vec<String>, order: i64, func: F) -> Arc<Handler>
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let handler = self.events().on_event_pre(types, order, func);
        self.handlers.lock().push(handler.clone());
        handler
    }

    /// Register a post event handler owned by this stage
    pub fn on_event_post<F>(&self, types: Vec<String>, order: i64, func: F) -> Arc<Handler>
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let handler = self.events().on_event_post(types, order, func);
        self.handlers.lock().push(handler.clone());
        handler
    }

    /// Publish a stage event (`NAME` becomes `bgpipe/<cmd>.NAME`)
    pub async fn event(&self, name: &str, value: Option<serde_json::Value>) {
        let mut ev = Event::new(&format!("{}.{}", self.cmd, name));
        ev.value = value;
        self.events().publish(ev).await;
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Eligible to start without further events
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// The running flag callbacks are bound to
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    /// Token cancelled when this stage should stop (stop event, pipeline
    /// cancellation); every blocking call in `run` selects against it
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    pub(crate) fn stop(&self) {
        self.set_enabled(false);
        self.set_running(false);
        self.stop_token.cancel();
    }

    /// Cancel the whole pipeline with this stage as the cause
    pub fn cancel(&self, cause: crate::CoreError) {
        self.shared.cancel.cancel(crate::CoreError::Stage {
            index: self.index(),
            name: self.name(),
            source: Box::new(cause),
        });
    }

    // ------------------------------------------------------------------
    // Wait-group ledger
    // ------------------------------------------------------------------

    /// Derive the ledger participation from what attach registered
    pub(crate) fn compute_wg_mask(&self) {
        let mut mask = WgMask::default();
        for input in self.inputs.lock().iter() {
            match input.dir() {
                Dir::L => mask.write_l = true,
                Dir::R => mask.write_r = true,
            }
        }
        for cb in self.callbacks.lock().iter() {
            match cb.dir() {
                Dir::L => mask.read_l = true,
                Dir::R => mask.read_r = true,
            }
        }
        *self.wg_mask.lock() = mask;
    }

    /// Register or deregister on every ledger this stage participates in
    pub fn wg_add(&self, delta: i64) {
        let mask = *self.wg_mask.lock();
        if mask.write_l {
            self.shared.wg_lwrite.add(delta);
        }
        if mask.read_l {
            self.shared.wg_lread.add(delta);
        }
        if mask.write_r {
            self.shared.wg_rwrite.add(delta);
        }
        if mask.read_r {
            self.shared.wg_rread.add(delta);
        }
    }

    // ------------------------------------------------------------------
    // Attach-time stamping (pipeline internal)
    // ------------------------------------------------------------------

    pub(crate) fn stamp_registrations(
        &self,
        frev: bgpipe_pipe::FilterMode,
        ffwd: bgpipe_pipe::FilterMode,
        filter_id: usize,
    ) {
        let index = self.index();
        for cb in self.callbacks.lock().iter() {
            cb.set_id(index);
            cb.bind_enabled(self.running.clone());
        }
        for handler in self.handlers.lock().iter() {
            handler.set_id(index);
            handler.bind_enabled(self.running.clone());
        }
        for input in self.inputs.lock().iter() {
            input.set_id(index);
            match input.dir() {
                Dir::L => input.set_filter(frev, filter_id, true),
                Dir::R => input.set_filter(ffwd, filter_id, false),
            }
        }
    }
}

impl std::fmt::Debug for StageBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageBase")
            .field("index", &self.index())
            .field("cmd", &self.cmd)
            .field("name", &self.name())
            .field("first", &self.is_first())
            .field("last", &self.is_last())
            .field("left", &self.is_left())
            .field("right", &self.is_right())
            .field("enabled", &self.is_enabled())
            .field("running", &self.is_running())
            .finish()
    }
}
