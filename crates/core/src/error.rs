//! Pipeline error types

use thiserror::Error;

use bgpipe_msg::MsgError;
use bgpipe_pipe::PipeError;

/// Errors raised by pipeline configuration, attachment and runtime
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stage index was reused with a different command
    #[error("[{index}] {cmd}: already defined as a different command: {existing}")]
    StageConflict {
        index: usize,
        cmd: String,
        existing: String,
    },

    /// Command name not present in the registry
    #[error("unknown stage command: {0}")]
    UnknownCommand(String),

    /// A declared positional argument was not supplied
    #[error("needs an argument: {0}")]
    MissingArgument(String),

    /// Flag parsing failed
    #[error(transparent)]
    Usage(#[from] clap::Error),

    /// `--in` names a target that cannot be resolved
    #[error("unknown injection target: {0}")]
    BadInject(String),

    /// `--in @name` matches more than one stage
    #[error("ambiguous stage reference: {0}")]
    AmbiguousName(String),

    /// A consuming stage sits in the middle of the chain
    #[error("must be either the first or the last stage")]
    FirstOrLast,

    /// `--left` with `--right` on a stage that cannot work both directions
    #[error("-L and -R allowed only for bidirectional stages")]
    LeftRight,

    /// Empty pipeline
    #[error("needs at least 1 stage")]
    NoStages,

    /// The stage was told to stop; treated as a clean exit
    #[error("stage stopped")]
    Stopped,

    /// A stage failed; carries the stage identity for the exit message
    #[error("[{index}] {name}: {source}")]
    Stage {
        index: usize,
        name: String,
        #[source]
        source: Box<CoreError>,
    },

    /// I/O failure talking to an external reader/writer
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Message codec failure
    #[error(transparent)]
    Msg(#[from] MsgError),

    /// Stream failure
    #[error(transparent)]
    Pipe(#[from] PipeError),

    /// Stage-specific failure that fits no other kind
    #[error("{0}")]
    Custom(String),
}

impl CoreError {
    /// Shorthand for one-off stage errors
    pub fn custom(msg: impl Into<String>) -> Self {
        CoreError::Custom(msg.into())
    }

    /// Whether this is the clean stop signal rather than a real failure
    pub fn is_stopped(&self) -> bool {
        matches!(self, CoreError::Stopped)
    }
}
