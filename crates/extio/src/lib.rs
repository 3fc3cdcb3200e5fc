//! bgpipe - External I/O adapter
//!
//! Bridges a stage to an outside byte stream: a child process, a socket, a
//! file, or the terminal. Handles the three representations (raw wire
//! frames, MRT records, JSON lines), per-type filtering, metadata rewrite
//! and the read/write/copy mode matrix, so concrete stages only move bytes.
//!
//! # Data flow
//!
//! ```text
//! outside bytes --> read_stream/read_buf/read_single --> type filter --> stream inputs
//! stream callback (send_msg) --> serialize --> bounded egress queue --> write_stream --> outside
//! ```
//!
//! # Key Design
//!
//! - **Hijack by default**: messages captured on egress are marked dropped
//!   so they leave the in-pipe flow; `--copy` mirrors them instead.
//! - **Backpressure**: the egress queue is bounded; a slow outside writer
//!   slows the pump instead of ballooning memory.
//! - **Race-safe close**: the egress queue uses an idempotent close, because
//!   a stream-done watcher and an explicit `output_close` may race.

mod adapter;
mod flags;

pub use adapter::{CheckCb, Extio, ExtioMetrics, ExtioMetricsSnapshot, Repr};
pub use flags::{extio_flags, ExtioMode};

/// Capacity of the bounded egress queue
pub const OUTPUT_QUEUE_SIZE: usize = 100;

/// Initial read buffer for [`Extio::read_stream`]
pub const READ_BUF_INITIAL: usize = 64 * 1024;

/// Read buffer growth cap
pub const READ_BUF_MAX: usize = 4 * 1024 * 1024;
