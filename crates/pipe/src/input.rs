//! Stream inputs - the injection side of a stream

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use bgpipe_msg::{from_wire, Dir, Msg, MsgError};

use crate::{PipeError, Result};

/// Position filter mode.
///
/// The filter is a *skip* predicate: a callback whose stage index satisfies
/// the comparison against the input's filter id does not see messages
/// injected through that input. Callbacks owned by the internal stage 0 are
/// never skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Skip nobody - full chain traversal (`--in first`)
    #[default]
    None,
    /// Skip everybody - straight to the stream output (`--in last`)
    All,
    /// Skip indexes >= the filter id
    Ge,
    /// Skip indexes > the filter id
    Gt,
    /// Skip indexes <= the filter id
    Le,
    /// Skip indexes < the filter id
    Lt,
}

impl FilterMode {
    /// Whether a callback owned by stage `cb_id` is skipped under this mode
    pub fn skips(self, cb_id: usize, filter_id: usize) -> bool {
        if cb_id == 0 {
            return false;
        }
        match self {
            FilterMode::None => false,
            FilterMode::All => true,
            FilterMode::Ge => cb_id >= filter_id,
            FilterMode::Gt => cb_id > filter_id,
            FilterMode::Le => cb_id <= filter_id,
            FilterMode::Lt => cb_id < filter_id,
        }
    }
}

/// Message envelope queued on a stream: the payload plus a snapshot of the
/// injecting input's position filter.
pub(crate) struct Envelope {
    pub msg: Msg,
    pub mode: FilterMode,
    pub filter_id: usize,
}

/// A stage-owned handle for injecting messages into one stream.
///
/// Created during attach via `Stream::add_input`; the owning stage index and
/// the position filter are stamped by the pipeline once stage positions are
/// final.
pub struct Input {
    dir: Dir,
    id: AtomicUsize,
    filter: Mutex<(FilterMode, usize)>,
    reverse: AtomicBool,
    closed: AtomicBool,
    tx: mpsc::Sender<Envelope>,
}

impl Input {
    pub(crate) fn new(dir: Dir, tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            dir,
            id: AtomicUsize::new(0),
            filter: Mutex::new((FilterMode::None, 0)),
            reverse: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tx,
        }
    }

    /// Direction this input injects into
    #[inline]
    pub fn dir(&self) -> Dir {
        self.dir
    }

    /// Owning stage index
    #[inline]
    pub fn id(&self) -> usize {
        self.id.load(Ordering::Relaxed)
    }

    /// Stamp the owning stage index (attach time)
    pub fn set_id(&self, id: usize) {
        self.id.store(id, Ordering::Relaxed);
    }

    /// Stamp the position filter (attach time). `reverse` records that this
    /// input feeds the L direction, whose chain frame is reversed relative
    /// to the command line; the mode passed in is already chosen for it.
    pub fn set_filter(&self, mode: FilterMode, filter_id: usize, reverse: bool) {
        *self.filter.lock() = (mode, filter_id);
        self.reverse.store(reverse, Ordering::Relaxed);
    }

    /// Current position filter
    pub fn filter(&self) -> (FilterMode, usize) {
        *self.filter.lock()
    }

    /// Stop accepting writes through this handle
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Inject one message.
    ///
    /// The message is stamped with this input's direction; its action flags
    /// are cleared so a re-injected message starts fresh. Fails once this
    /// handle or the stream input side is closed.
    pub async fn write_msg(&self, mut msg: Msg) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(PipeError::InputClosed);
        }

        msg.set_dir(self.dir);
        msg.ctx.action.clear();

        let (mode, filter_id) = self.filter();
        self.tx
            .send(Envelope {
                msg,
                mode,
                filter_id,
            })
            .await
            .map_err(|_| PipeError::InputClosed)
    }

    /// Parse raw wire frames from `buf` and inject each one that passes
    /// `check`. Returns the number of bytes consumed; a trailing partial
    /// frame stays unconsumed for the caller to re-offer with more bytes.
    pub async fn write_func<F>(&self, buf: &[u8], mut check: F) -> Result<usize>
    where
        F: FnMut(&mut Msg) -> bool,
    {
        let mut pos = 0;
        while pos < buf.len() {
            let (mut msg, used) = match from_wire(&buf[pos..]) {
                Ok(parsed) => parsed,
                Err(MsgError::Incomplete) => break,
                Err(e) => return Err(e.into()),
            };
            pos += used;

            if check(&mut msg) {
                self.write_msg(msg).await?;
            }
        }
        Ok(pos)
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (mode, filter_id) = self.filter();
        f.debug_struct("Input")
            .field("dir", &self.dir)
            .field("id", &self.id())
            .field("mode", &mode)
            .field("filter_id", &filter_id)
            .field("reverse", &self.reverse.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_modes() {
        assert!(!FilterMode::None.skips(3, 5));
        assert!(FilterMode::All.skips(3, 5));

        assert!(FilterMode::Ge.skips(5, 5));
        assert!(!FilterMode::Ge.skips(4, 5));
        assert!(FilterMode::Gt.skips(6, 5));
        assert!(!FilterMode::Gt.skips(5, 5));

        assert!(FilterMode::Le.skips(5, 5));
        assert!(!FilterMode::Le.skips(6, 5));
        assert!(FilterMode::Lt.skips(4, 5));
        assert!(!FilterMode::Lt.skips(5, 5));
    }

    #[test]
    fn test_internal_stage_never_skipped() {
        for mode in [
            FilterMode::All,
            FilterMode::Ge,
            FilterMode::Gt,
            FilterMode::Le,
            FilterMode::Lt,
        ] {
            assert!(!mode.skips(0, 3), "{mode:?} must not skip stage 0");
        }
    }
}
