//! bgpipe - Built-in stages
//!
//! The concrete stages shipped with the pipeline runtime. Each module
//! provides one command; [`register_all`] wires them into a registry.
//!
//! | Command | Role |
//! |---------|------|
//! | `tcp` | dial a BGP peer, optional TCP-MD5 |
//! | `listen` | accept one BGP peer connection |
//! | `stdin` | read messages from standard input |
//! | `stdout` | write messages to standard output |
//! | `mrt` | replay an MRT (BGP4MP) file |
//! | `grep` | filter messages by type |
//! | `exec` | run an external process filter |
//! | `speaker` | minimal in-process BGP speaker |

mod exec;
mod grep;
mod mrt;
mod speaker;
mod stdinout;
mod tcp;

pub use exec::ExecStage;
pub use grep::GrepStage;
pub use mrt::MrtStage;
pub use speaker::SpeakerStage;
pub use stdinout::{StdinStage, StdoutStage};
pub use tcp::{ListenStage, TcpStage};

use bgpipe_core::Registry;

/// Register every built-in stage command
pub fn register_all(registry: &mut Registry) {
    registry.register("tcp", tcp::tcp_spec());
    registry.register("listen", tcp::listen_spec());
    registry.register("stdin", stdinout::stdin_spec());
    registry.register("stdout", stdinout::stdout_spec());
    registry.register("mrt", mrt::spec());
    registry.register("grep", grep::spec());
    registry.register("exec", exec::spec());
    registry.register("speaker", speaker::spec());
}
