//! The adapter's CLI flag block

use clap::{Arg, ArgAction, Command};

/// Which side of the adapter a stage exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtioMode {
    /// Both directions configurable (`exec`, sockets)
    Bidir,

    /// Outside bytes feed the pipe only (`mrt`, `stdin`)
    ReadOnly,

    /// Pipe messages feed the outside only (`stdout`)
    WriteOnly,
}

/// Add the adapter flags a stage of the given mode understands.
///
/// Fixed-mode stages do not expose `--read`/`--write`; the mode is forced
/// at attach instead.
pub fn extio_flags(cmd: Command, mode: ExtioMode) -> Command {
    let mut cmd = cmd
        .arg(
            Arg::new("raw")
                .long("raw")
                .action(ArgAction::SetTrue)
                .help("speak raw BGP instead of JSON"),
        )
        .arg(
            Arg::new("mrt")
                .long("mrt")
                .action(ArgAction::SetTrue)
                .help("speak MRT-BGP4MP instead of JSON"),
        )
        .arg(
            Arg::new("type")
                .long("type")
                .value_name("TYPE")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .help("skip if message is not of specified type(s)"),
        );

    if mode == ExtioMode::Bidir {
        cmd = cmd
            .arg(
                Arg::new("read")
                    .long("read")
                    .action(ArgAction::SetTrue)
                    .help("read-only mode (no output from the pipe)"),
            )
            .arg(
                Arg::new("write")
                    .long("write")
                    .action(ArgAction::SetTrue)
                    .help("write-only mode (no input to the pipe)"),
            );
    }

    if mode != ExtioMode::ReadOnly {
        cmd = cmd.arg(
            Arg::new("copy")
                .long("copy")
                .action(ArgAction::SetTrue)
                .help("copy messages instead of filtering (mirror)"),
        );
    }

    if mode != ExtioMode::WriteOnly {
        cmd = cmd
            .arg(
                Arg::new("pardon")
                    .long("pardon")
                    .action(ArgAction::SetTrue)
                    .help("ignore input parse errors"),
            )
            .arg(
                Arg::new("no-seq")
                    .long("no-seq")
                    .action(ArgAction::SetTrue)
                    .help("overwrite input message sequence number"),
            )
            .arg(
                Arg::new("no-time")
                    .long("no-time")
                    .action(ArgAction::SetTrue)
                    .help("overwrite input message time"),
            )
            .arg(
                Arg::new("no-tags")
                    .long("no-tags")
                    .action(ArgAction::SetTrue)
                    .help("drop input message tags"),
            );
    }

    cmd
}
