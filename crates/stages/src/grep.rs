//! Type filter stage

use async_trait::async_trait;
use clap::{Arg, ArgAction, Command};

use bgpipe_core::{CoreError, Result, Stage, StageOptions, StageRef, StageSpec};
use bgpipe_msg::{Dir, Msg, MsgType};
use bgpipe_pipe::FnHandler;

pub(crate) fn spec() -> StageSpec {
    StageSpec {
        options: StageOptions {
            descr: "drop messages not matching the given types",
            bidir: true,
            ..Default::default()
        },
        command: || {
            Command::new("grep")
                .arg(
                    Arg::new("type")
                        .long("type")
                        .value_name("TYPE")
                        .value_delimiter(',')
                        .action(ArgAction::Append)
                        .help("message type(s) to let through"),
                )
                .arg(
                    Arg::new("invert")
                        .long("invert")
                        .short('v')
                        .action(ArgAction::SetTrue)
                        .help("drop matching messages instead"),
                )
        },
        ctor: Box::new(|| Box::new(GrepStage::default())),
    }
}

/// Drops in-flight messages whose type does not match `--type`.
///
/// The drop consumes the message for every later callback; its sequence
/// number stays used.
#[derive(Default)]
pub struct GrepStage;

#[async_trait]
impl Stage for GrepStage {
    fn attach(&mut self, base: &StageRef) -> Result<()> {
        let cfg = base.cfg();
        let invert = cfg.flag("invert");
        let mut types = Vec::new();
        for t in cfg.strings("type") {
            if t.is_empty() {
                continue;
            }
            types.push(t.parse::<MsgType>()?);
        }
        if types.is_empty() {
            return Err(CoreError::MissingArgument("--type".to_string()));
        }

        let mut dirs = Vec::new();
        if base.is_left() {
            dirs.push(Dir::L);
        }
        if base.is_right() {
            dirs.push(Dir::R);
        }
        for dir in dirs {
            let types = types.clone();
            base.on_msg(
                dir,
                Box::new(FnHandler(move |m: &mut Msg| {
                    if types.contains(&m.typ()) == invert {
                        m.ctx.action.drop();
                    }
                    true
                })),
                vec![],
            );
        }
        Ok(())
    }

    async fn run(&mut self, base: StageRef) -> Result<()> {
        // a pure transformer lives exactly as long as the flows it taps
        let l_done = base.pipe().stream(Dir::L).done_token();
        let r_done = base.pipe().stream(Dir::R).done_token();
        let stop_token = base.stop_token();
        tokio::select! {
            _ = async {
                l_done.cancelled().await;
                r_done.cancelled().await;
            } => Ok(()),
            _ = stop_token.cancelled() => Err(CoreError::Stopped),
        }
    }
}
