//! bgpipe - Pipeline orchestrator
//!
//! Turns a flat argv list into a bidirectional processing graph: stages are
//! constructed left-to-right, wired onto the two message streams according to
//! their direction and position, then run concurrently until the streams
//! collapse.
//!
//! # Lifecycle
//!
//! ```text
//! Pipeline::configure   argv -> global flags + ordered stage list
//! Pipeline::attach      resolve positions/directions, wire inputs+callbacks
//! Pipeline::start       spawn stages, arm the shutdown watchers
//! Pipeline::wait        join everything, return the first cancel cause
//! ```
//!
//! # Shutdown discipline
//!
//! Each stage registers on the wait-group of every stream side it writes or
//! reads. Four watcher tasks close the input side of a stream when its last
//! writer exits and the output side when its last reader exits; this collapses
//! the pipeline deterministically, side by side, with every close happening
//! exactly once.

mod cancel;
mod config;
mod error;
mod pipeline;
mod registry;
mod stage;

pub use cancel::CancelCause;
pub use config::{is_addr, is_file, GlobalConfig, StageConfig};
pub use error::CoreError;
pub use pipeline::Pipeline;
pub use registry::{Registry, StageCtor, StageSpec};
pub use stage::{Stage, StageBase, StageOptions, StageRef};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, CoreError>;

// Test modules
#[cfg(test)]
mod config_test;
