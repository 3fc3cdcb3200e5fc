//! The adapter proper: ingress parsing, egress serialization, close rules

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use bgpipe_core::{CoreError, Result, StageRef};
use bgpipe_msg::{
    from_wire, msg_from_json, update_from_json, Caps, Dir, MrtParse, MrtReader, Msg, MsgError,
    MsgType,
};
use bgpipe_pipe::{Callback, ClosableSender, Input, MsgHandler, Stream};

use crate::{ExtioMode, OUTPUT_QUEUE_SIZE, READ_BUF_INITIAL, READ_BUF_MAX};

/// Per-message hook offered by the read entry points; returning `false`
/// swallows the message before it reaches the pipe
pub type CheckCb = dyn Fn(&mut Msg) -> bool + Send + Sync;

/// Outside-stream representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repr {
    /// One message per line, `[...]` or `{...}`
    Json,
    /// Raw BGP wire frames
    Raw,
    /// MRT BGP4MP records
    Mrt,
}

/// Adapter counters
#[derive(Debug, Default)]
pub struct ExtioMetrics {
    /// Messages parsed off the outside stream
    pub parsed: AtomicU64,

    /// Ingress parse failures (pardoned or fatal)
    pub parse_errors: AtomicU64,

    /// Buffers queued for the outside writer
    pub queued: AtomicU64,

    /// Egress messages lost to a closed queue
    pub egress_dropped: AtomicU64,
}

impl ExtioMetrics {
    pub fn snapshot(&self) -> ExtioMetricsSnapshot {
        ExtioMetricsSnapshot {
            parsed: self.parsed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            egress_dropped: self.egress_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of adapter counters
#[derive(Debug, Clone, Copy)]
pub struct ExtioMetricsSnapshot {
    pub parsed: u64,
    pub parse_errors: u64,
    pub queued: u64,
    pub egress_dropped: u64,
}

/// External I/O helper created by every stage that talks to an outside byte
/// stream. See the crate docs for the flow.
pub struct Extio {
    raw: bool,
    mrt: bool,
    copy: bool,
    no_seq: bool,
    no_time: bool,
    no_tags: bool,
    pardon: bool,
    types: Vec<MsgType>,

    /// Flipped by `output_close`; egress becomes a no-op
    read_only: AtomicBool,

    /// Flipped by `input_close`; ingress becomes a no-op
    write_only: AtomicBool,

    caps: Caps,
    mrt_reader: MrtReader,

    input_l: Option<Arc<Input>>,
    input_r: Option<Arc<Input>>,
    input_d: Option<Arc<Input>>,
    callbacks: Mutex<Vec<Arc<Callback>>>,

    /// Streams the egress callbacks observe; once all are done, no more
    /// output can be queued
    egress_streams: Vec<Arc<Stream>>,

    /// Ingress carry-over for partial frames/records/lines
    ibuf: tokio::sync::Mutex<BytesMut>,

    output_tx: ClosableSender<Bytes>,
    output_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Bytes>>>,

    metrics: ExtioMetrics,
}

/// The egress callback registered on the pipe streams
struct SendHandler(Arc<Extio>);

#[async_trait]
impl MsgHandler for SendHandler {
    async fn on_msg(&self, msg: &mut Msg) -> bool {
        self.0.send_msg(msg).await
    }
}

impl Extio {
    /// Parse the adapter flags and wire inputs/callbacks for the stage.
    ///
    /// Must be called from the stage's `attach`, after directions are
    /// resolved. Conflicting modes fail here, before anything runs.
    pub fn attach(base: &StageRef, mode: ExtioMode) -> Result<Arc<Self>> {
        Self::attach_with(base, mode, Repr::Json)
    }

    /// [`Extio::attach`] with a different default representation, for
    /// stages whose outside format is not JSON unless overridden (`tcp`
    /// speaks wire frames, `mrt` speaks MRT records).
    pub fn attach_with(base: &StageRef, mode: ExtioMode, default: Repr) -> Result<Arc<Self>> {
        let cfg = base.cfg();

        if cfg.flag("read") && cfg.flag("write") {
            return Err(CoreError::custom(
                "--read and --write: must not use both at the same time",
            ));
        }
        let read_only = mode == ExtioMode::ReadOnly || cfg.flag("read");
        let write_only = mode == ExtioMode::WriteOnly || cfg.flag("write");

        // one-directional adapters only make sense as mirrors
        let copy = cfg.flag("copy") || read_only || write_only;

        if cfg.flag("raw") && cfg.flag("mrt") {
            return Err(CoreError::custom(
                "--raw and --mrt: must not use both at the same time",
            ));
        }
        let flagged = cfg.flag("raw") || cfg.flag("mrt");
        let raw = cfg.flag("raw") || (!flagged && default == Repr::Raw);
        let mrt = cfg.flag("mrt") || (!flagged && default == Repr::Mrt);
        if mrt && !read_only {
            return Err(CoreError::Msg(MsgError::Unsupported(
                "writing MRT; use --read",
            )));
        }

        let mut types = Vec::new();
        for t in cfg.strings("type") {
            if t.is_empty() {
                continue;
            }
            types.push(t.parse::<MsgType>()?);
        }

        let no_tags = cfg.flag("no-tags");
        let (output_tx, output_rx) = ClosableSender::new(OUTPUT_QUEUE_SIZE);
        let mut eio = Extio {
            raw,
            mrt,
            copy,
            no_seq: cfg.flag("no-seq"),
            no_time: cfg.flag("no-time"),
            no_tags,
            pardon: cfg.flag("pardon"),
            types: types.clone(),
            read_only: AtomicBool::new(read_only),
            write_only: AtomicBool::new(write_only),
            caps: base.pipe().caps.read().clone(),
            mrt_reader: MrtReader { no_tags },
            input_l: None,
            input_r: None,
            input_d: None,
            callbacks: Mutex::new(Vec::new()),
            egress_streams: Vec::new(),
            ibuf: tokio::sync::Mutex::new(BytesMut::new()),
            output_tx,
            output_rx: tokio::sync::Mutex::new(Some(output_rx)),
            metrics: ExtioMetrics::default(),
        };

        // not write-only? feed the pipe
        if !write_only {
            if base.is_bidir() {
                let l = base.add_input(Dir::L);
                let r = base.add_input(Dir::R);
                eio.input_d = Some(if base.is_last() { l.clone() } else { r.clone() });
                eio.input_l = Some(l);
                eio.input_r = Some(r);
            } else if base.is_left() {
                let l = base.add_input(Dir::L);
                // re-route wrong-direction messages to our only input
                eio.input_r = Some(l.clone());
                eio.input_d = Some(l.clone());
                eio.input_l = Some(l);
            } else {
                let r = base.add_input(Dir::R);
                eio.input_l = Some(r.clone());
                eio.input_d = Some(r.clone());
                eio.input_r = Some(r);
            }
        }

        // which flow(s) the egress taps: a unidirectional endpoint stage
        // captures whatever arrives at its end of the chain; everything
        // else captures its own direction(s)
        let mut dirs = Vec::new();
        if base.options.is_consumer && !base.is_bidir() {
            if base.is_first() {
                dirs.push(Dir::L);
            }
            if base.is_last() {
                dirs.push(Dir::R);
            }
        } else {
            if base.is_left() {
                dirs.push(Dir::L);
            }
            if base.is_right() {
                dirs.push(Dir::R);
            }
        }
        for dir in &dirs {
            eio.egress_streams.push(base.pipe().stream(*dir).clone());
        }

        let eio = Arc::new(eio);

        // not read-only? capture the pipe's output
        if !read_only {
            for dir in dirs {
                let cb = base.on_msg(dir, Box::new(SendHandler(eio.clone())), types.clone());
                eio.callbacks.lock().push(cb);
            }
        }

        Ok(eio)
    }

    /// Adapter counters
    #[inline]
    pub fn metrics(&self) -> &ExtioMetrics {
        &self.metrics
    }

    // ------------------------------------------------------------------
    // Ingress
    // ------------------------------------------------------------------

    /// Type filter and metadata rewrite; `false` drops the message
    fn check_msg(&self, msg: &mut Msg) -> bool {
        if !self.types.is_empty() && !self.types.contains(&msg.typ()) {
            return false;
        }
        if self.no_seq {
            msg.clear_seq();
        }
        if self.no_time {
            msg.time = Utc::now();
        }
        if self.no_tags {
            msg.drop_tags();
        }
        true
    }

    /// Parse exactly one message held in `buf` and inject it.
    ///
    /// Raw and MRT inputs must fill the buffer exactly; text inputs may be
    /// comments (skipped). Parse errors are pardoned or surfaced per
    /// `--pardon`. Safe to call concurrently.
    pub async fn read_single(&self, buf: &[u8], cb: Option<&CheckCb>) -> Result<()> {
        if self.write_only.load(Ordering::Relaxed) {
            return Ok(());
        }

        let parsed: std::result::Result<Option<Msg>, MsgError> = if self.raw {
            match from_wire(buf) {
                Ok((msg, n)) if n == buf.len() => Ok(Some(msg)),
                Ok(_) => Err(MsgError::Length), // dangling bytes after msg
                Err(MsgError::Incomplete) => Err(MsgError::Length),
                Err(e) => Err(e),
            }
        } else if self.mrt {
            match self.mrt_reader.read_record(buf) {
                Ok(MrtParse::Msg { msg, consumed }) if consumed == buf.len() => Ok(Some(msg)),
                Ok(MrtParse::Msg { .. }) => Err(MsgError::Length),
                Ok(MrtParse::Skip { .. }) => Ok(None), // BGP4MP but not a message
                Err(MsgError::Incomplete) => Err(MsgError::Length),
                Err(e) => Err(e),
            }
        } else {
            let line = buf.trim_ascii();
            if line.is_empty() || line[0] == b'#' {
                Ok(None) // comment
            } else if line[0] == b'[' {
                msg_from_json(line).map(|mut msg| {
                    if msg.typ() == MsgType::INVALID {
                        msg.set_typ(MsgType::KEEPALIVE); // for convenience
                    }
                    Some(msg)
                })
            } else if line[0] == b'{' {
                update_from_json(line).map(Some)
            } else {
                Err(MsgError::Format)
            }
        };

        let mut msg = match parsed {
            Ok(Some(msg)) => msg,
            Ok(None) => return Ok(()),
            Err(err) => {
                self.metrics.parse_errors.fetch_add(1, Ordering::Relaxed);
                if self.pardon {
                    debug!(%err, "pardoned input parse error");
                    return Ok(());
                }
                error!(%err, len = buf.len(), "input read single error");
                return Err(err.into());
            }
        };
        self.metrics.parsed.fetch_add(1, Ordering::Relaxed);

        if !self.check_msg(&mut msg) {
            return Ok(());
        }
        if let Some(cb) = cb {
            if !cb(&mut msg) {
                return Ok(());
            }
        }

        msg.copy_data();
        self.route(msg).await
    }

    /// Hand one message to the input matching its direction
    async fn route(&self, msg: Msg) -> Result<()> {
        let input = match msg.dir() {
            Some(Dir::L) => &self.input_l,
            Some(Dir::R) => &self.input_r,
            None => &self.input_d,
        };
        match input {
            Some(input) => Ok(input.write_msg(msg).await?),
            None => Ok(()),
        }
    }

    /// Streaming variant of [`Extio::read_single`]: buffers partial frames,
    /// records and lines internally. Must not be used concurrently.
    pub async fn read_buf(&self, buf: &[u8], cb: Option<&CheckCb>) -> Result<()> {
        if self.write_only.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut ibuf = self.ibuf.lock().await;
        ibuf.extend_from_slice(buf);

        if self.raw {
            let check = |m: &mut Msg| self.check_msg(m) && cb.map_or(true, |f| f(m));
            let input = match &self.input_d {
                Some(input) => input,
                None => return Ok(()),
            };
            match input.write_func(&ibuf, check).await {
                Ok(consumed) => ibuf.advance(consumed),
                Err(err) => return self.buf_error(&mut ibuf, err.into()),
            }
        } else if self.mrt {
            loop {
                let record = self.mrt_reader.read_record(&ibuf);
                match record {
                    Err(MsgError::Incomplete) => break, // wait for more
                    Err(err) => return self.buf_error(&mut ibuf, err.into()),
                    Ok(MrtParse::Skip { consumed }) => ibuf.advance(consumed),
                    Ok(MrtParse::Msg { mut msg, consumed }) => {
                        ibuf.advance(consumed);
                        self.metrics.parsed.fetch_add(1, Ordering::Relaxed);
                        if self.check_msg(&mut msg) && cb.map_or(true, |f| f(&mut msg)) {
                            msg.copy_data();
                            self.route(msg).await?;
                        }
                    }
                }
            }
        } else {
            // parse all complete lines buffered so far
            while let Some(i) = ibuf.iter().position(|&b| b == b'\n') {
                let line = ibuf.split_to(i + 1).freeze();
                self.read_single(&line, cb).await?;
            }
        }

        Ok(())
    }

    /// Parse-error policy for the streaming path: pardon drops the pending
    /// bytes (nothing before them was lost), otherwise the error surfaces.
    fn buf_error(&self, ibuf: &mut BytesMut, err: CoreError) -> Result<()> {
        self.metrics.parse_errors.fetch_add(1, Ordering::Relaxed);
        if self.pardon {
            debug!(%err, dropped = ibuf.len(), "pardoned input stream error");
            ibuf.clear();
            return Ok(());
        }
        error!(%err, "input read stream error");
        Err(err)
    }

    /// Pump an external byte reader through [`Extio::read_buf`] until EOF.
    ///
    /// The read buffer starts at 64 KiB and doubles whenever a read fills
    /// more than half of it, up to 4 MiB. Must not be used concurrently.
    pub async fn read_stream<R>(&self, mut reader: R, cb: Option<&CheckCb>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; READ_BUF_INITIAL];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(()); // EOF is not an error
            }
            self.read_buf(&buf[..n], cb).await?;

            let len = buf.len();
            if n > len / 2 && len < READ_BUF_MAX {
                buf.resize(len * 2, 0);
            }
        }
    }

    // ------------------------------------------------------------------
    // Egress
    // ------------------------------------------------------------------

    /// Capture one pipe message for the outside writer. Runs as a stream
    /// callback; hijacks the message out of the in-pipe flow unless in copy
    /// mode. Returning `false` asks for callback self-removal.
    async fn send_msg(&self, msg: &mut Msg) -> bool {
        if self.read_only.load(Ordering::Relaxed) {
            return true; // message stays in the pipe
        }

        if !self.copy {
            msg.ctx.action.drop();
        }

        let payload = if self.raw {
            match msg.marshal(&self.caps) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%err, "egress marshal error");
                    return true;
                }
            }
        } else {
            let mut line = msg.to_json();
            line.push('\n');
            Bytes::from(line)
        };

        if self.output_tx.send(payload).await {
            self.metrics.queued.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.metrics.egress_dropped.fetch_add(1, Ordering::Relaxed);
            false // queue closed underneath us
        }
    }

    /// Drain the egress queue into an external writer until the queue is
    /// closed (clean end) or the writer fails.
    pub async fn write_stream<W>(&self, mut writer: W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut rx = match self.output_rx.lock().await.take() {
            Some(rx) => rx,
            None => return Ok(()), // someone else is draining
        };

        while let Some(chunk) = rx.recv().await {
            if let Err(err) = writer.write_all(&chunk).await {
                self.output_close();
                return Err(err.into());
            }
            if let Err(err) = writer.flush().await {
                self.output_close();
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Close the egress once every observed stream has pumped its last
    /// message; after that no callback can queue more output, so the
    /// outside writer can drain and finish.
    pub fn close_on_done(self: &Arc<Self>) {
        let eio = self.clone();
        tokio::spawn(async move {
            for stream in &eio.egress_streams {
                stream.done_token().cancelled().await;
            }
            eio.output_close();
        });
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Flip to read-only: drop the egress callbacks and close the queue.
    /// Idempotent; may race with the stream-done watcher.
    pub fn output_close(&self) {
        self.read_only.store(true, Ordering::Relaxed);
        for cb in self.callbacks.lock().iter() {
            cb.drop_cb();
        }
        self.output_tx.close();
    }

    /// Flip to write-only and close all stage inputs
    pub fn input_close(&self) {
        self.write_only.store(true, Ordering::Relaxed);
        for input in [&self.input_l, &self.input_r, &self.input_d]
            .into_iter()
            .flatten()
        {
            input.close();
        }
    }
}

impl std::fmt::Debug for Extio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extio")
            .field("raw", &self.raw)
            .field("mrt", &self.mrt)
            .field("copy", &self.copy)
            .field("read_only", &self.read_only.load(Ordering::Relaxed))
            .field("write_only", &self.write_only.load(Ordering::Relaxed))
            .field("types", &self.types)
            .finish()
    }
}
