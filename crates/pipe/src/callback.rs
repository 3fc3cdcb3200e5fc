//! Message callbacks - the output side of a stream

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use bgpipe_msg::{Dir, Msg, MsgType};

/// Handler invoked for every message passing through a stream.
///
/// Returning `false` unregisters the callback; message-level decisions are
/// expressed through `msg.ctx.action` instead.
#[async_trait]
pub trait MsgHandler: Send + Sync {
    async fn on_msg(&self, msg: &mut Msg) -> bool;
}

/// Adapter for plain synchronous closures
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> MsgHandler for FnHandler<F>
where
    F: Fn(&mut Msg) -> bool + Send + Sync,
{
    async fn on_msg(&self, msg: &mut Msg) -> bool {
        (self.0)(msg)
    }
}

/// One registered stream callback.
///
/// The stage index and the enabled binding are stamped during pipeline
/// attach; until then the callback belongs to the internal stage 0, which
/// position filters never skip.
pub struct Callback {
    id: AtomicUsize,
    dir: Dir,
    types: Vec<MsgType>,
    enabled: Mutex<Option<Arc<AtomicBool>>>,
    dropped: AtomicBool,
    pub(crate) handler: Box<dyn MsgHandler>,
}

impl Callback {
    pub(crate) fn new(dir: Dir, types: Vec<MsgType>, handler: Box<dyn MsgHandler>) -> Self {
        Self {
            id: AtomicUsize::new(0),
            dir,
            types,
            enabled: Mutex::new(None),
            dropped: AtomicBool::new(false),
            handler,
        }
    }

    /// Owning stage index
    #[inline]
    pub fn id(&self) -> usize {
        self.id.load(Ordering::Relaxed)
    }

    /// Stream direction this callback observes
    #[inline]
    pub fn dir(&self) -> Dir {
        self.dir
    }

    /// Stamp the owning stage index (attach time)
    pub fn set_id(&self, id: usize) {
        self.id.store(id, Ordering::Relaxed);
    }

    /// Bind the enabled flag to the owning stage's running state
    pub fn bind_enabled(&self, flag: Arc<AtomicBool>) {
        *self.enabled.lock() = Some(flag);
    }

    /// Unregister; the pump skips and forgets dropped callbacks
    pub fn drop_cb(&self) {
        self.dropped.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn is_enabled(&self) -> bool {
        match self.enabled.lock().as_ref() {
            Some(flag) => flag.load(Ordering::Relaxed),
            None => true,
        }
    }

    /// Whether this callback wants messages of the given type
    pub(crate) fn wants(&self, typ: MsgType) -> bool {
        self.types.is_empty() || self.types.contains(&typ)
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("id", &self.id())
            .field("dir", &self.dir)
            .field("types", &self.types)
            .field("dropped", &self.is_dropped())
            .finish()
    }
}
