//! bgpipe - Duplex streams and event bus
//!
//! The transport layer of a pipeline: two ordered message streams (one per
//! logical direction) plus an in-process pub/sub bus for named events.
//!
//! # Architecture
//!
//! ```text
//! [Stages]                 [Stream L / Stream R]             [Stages]
//!   Input ──┐                                             ┌──→ Callback
//!   Input ──┼──→ mpsc ──→ pump task ──→ position filter ──┼──→ Callback
//!   Input ──┘              (seq assignment)                └──→ Callback
//! ```
//!
//! # Key Design
//!
//! - **One pump task per direction**: messages injected through any
//!   [`Input`] of a stream are delivered to its callbacks in FIFO order by a
//!   single task; callbacks for one message run sequentially in registration
//!   order.
//! - **Position filters**: every input carries a skip-predicate over stage
//!   indexes, stamped at attach time, deciding which callbacks see messages
//!   injected through it.
//! - **Deterministic close**: `close_input` and `close_output` are
//!   idempotent; the input side drains before the pump exits, and writes to
//!   a closed stream fail instead of panicking.
//! - **Events**: stages publish named events; pre/post handlers run ordered
//!   by priority on a dedicated dispatch task.

mod callback;
mod error;
mod event;
mod input;
mod pipe;
mod stream;
mod sync;

pub use callback::{Callback, FnHandler, MsgHandler};
pub use error::PipeError;
pub use event::{fq_event, Event, EventBus, Handler, EVENT_ESTABLISHED, EVENT_START, EVENT_STOP};
pub use input::{FilterMode, Input};
pub use pipe::Pipe;
pub use stream::{Stream, StreamMetrics, StreamMetricsSnapshot};
pub use sync::{ClosableSender, WaitGroup};

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, PipeError>;

/// Capacity of each per-direction stream queue
pub const STREAM_QUEUE_SIZE: usize = 1024;

/// Capacity of the event bus queue
pub const EVENT_QUEUE_SIZE: usize = 256;

// Test modules
#[cfg(test)]
mod event_test;
#[cfg(test)]
mod stream_test;
