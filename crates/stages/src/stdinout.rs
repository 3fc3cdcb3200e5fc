//! Standard input/output stages

use std::sync::Arc;

use async_trait::async_trait;
use clap::Command;

use bgpipe_core::{CoreError, Result, Stage, StageOptions, StageRef, StageSpec};
use bgpipe_extio::{extio_flags, Extio, ExtioMode};

pub(crate) fn stdin_spec() -> StageSpec {
    StageSpec {
        options: StageOptions {
            descr: "read JSON/raw/MRT messages from stdin",
            bidir: true,
            is_producer: true,
            is_stdin: true,
            ..Default::default()
        },
        command: || extio_flags(Command::new("stdin"), ExtioMode::ReadOnly),
        ctor: Box::new(|| Box::new(StdinStage::default())),
    }
}

pub(crate) fn stdout_spec() -> StageSpec {
    StageSpec {
        options: StageOptions {
            descr: "write messages to stdout as JSON",
            bidir: true,
            is_stdout: true,
            ..Default::default()
        },
        command: || extio_flags(Command::new("stdout"), ExtioMode::WriteOnly),
        ctor: Box::new(|| Box::new(StdoutStage::default())),
    }
}

/// Feeds standard input into the pipe until EOF
#[derive(Default)]
pub struct StdinStage {
    eio: Option<Arc<Extio>>,
}

#[async_trait]
impl Stage for StdinStage {
    fn attach(&mut self, base: &StageRef) -> Result<()> {
        self.eio = Some(Extio::attach(base, ExtioMode::ReadOnly)?);
        Ok(())
    }

    async fn run(&mut self, base: StageRef) -> Result<()> {
        let eio = self
            .eio
            .clone()
            .ok_or_else(|| CoreError::custom("stdin: not attached"))?;

        let stop_token = base.stop_token();
        tokio::select! {
            result = eio.read_stream(tokio::io::stdin(), None) => result,
            _ = stop_token.cancelled() => {
                eio.input_close();
                Err(CoreError::Stopped)
            }
        }
    }
}

/// Writes captured pipe messages to standard output
#[derive(Default)]
pub struct StdoutStage {
    eio: Option<Arc<Extio>>,
}

#[async_trait]
impl Stage for StdoutStage {
    fn attach(&mut self, base: &StageRef) -> Result<()> {
        self.eio = Some(Extio::attach(base, ExtioMode::WriteOnly)?);
        Ok(())
    }

    async fn run(&mut self, base: StageRef) -> Result<()> {
        let eio = self
            .eio
            .clone()
            .ok_or_else(|| CoreError::custom("stdout: not attached"))?;

        // stop writing once nothing can produce output anymore
        eio.close_on_done();

        let stop_token = base.stop_token();
        tokio::select! {
            result = eio.write_stream(tokio::io::stdout()) => result,
            _ = stop_token.cancelled() => {
                eio.output_close();
                Err(CoreError::Stopped)
            }
        }
    }
}
