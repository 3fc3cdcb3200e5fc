//! Stream error types

use thiserror::Error;

use bgpipe_msg::MsgError;

/// Errors raised by stream and event operations
#[derive(Debug, Error)]
pub enum PipeError {
    /// The stream's input side is closed; the write was not accepted
    #[error("stream input closed")]
    InputClosed,

    /// A framed write failed to parse
    #[error("message codec: {0}")]
    Msg(#[from] MsgError),
}
