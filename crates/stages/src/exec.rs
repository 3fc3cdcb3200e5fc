//! External process filter stage

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Command;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use bgpipe_core::{CoreError, Result, Stage, StageOptions, StageRef, StageSpec};
use bgpipe_extio::{extio_flags, Extio, ExtioMode};

pub(crate) fn spec() -> StageSpec {
    StageSpec {
        options: StageOptions {
            descr: "filter messages through an external process",
            args_rest: true,
            bidir: true,
            is_producer: true,
            ..Default::default()
        },
        command: || extio_flags(Command::new("exec"), ExtioMode::Bidir),
        ctor: Box::new(|| Box::new(ExecStage::default())),
    }
}

/// Runs `CMD [ARGS...]`, feeding captured pipe messages to the child's
/// stdin and injecting whatever the child prints back.
///
/// By default the child hijacks the flow (a JSON filter); `--copy` turns it
/// into a passive observer.
#[derive(Default)]
pub struct ExecStage {
    argv: Vec<String>,
    eio: Option<Arc<Extio>>,
}

#[async_trait]
impl Stage for ExecStage {
    fn attach(&mut self, base: &StageRef) -> Result<()> {
        self.argv = base.cfg().rest.clone();
        if self.argv.is_empty() {
            return Err(CoreError::MissingArgument("command".to_string()));
        }
        self.eio = Some(Extio::attach(base, ExtioMode::Bidir)?);
        Ok(())
    }

    async fn run(&mut self, base: StageRef) -> Result<()> {
        let eio = self
            .eio
            .clone()
            .ok_or_else(|| CoreError::custom("exec: not attached"))?;

        let mut child = tokio::process::Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        debug!(cmd = %self.argv.join(" "), pid = child.id(), "spawned");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::custom("exec: no child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::custom("exec: no child stdout"))?;

        eio.close_on_done();

        let eio_r = eio.clone();
        let reader = tokio::spawn(async move { eio_r.read_stream(stdout, None).await });
        let eio_w = eio.clone();
        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            let result = eio_w.write_stream(&mut stdin).await;
            // closing the pipe is the child's EOF
            let _ = stdin.shutdown().await;
            drop(stdin);
            result
        });

        let stop_token = base.stop_token();
        let result = tokio::select! {
            pair = async { tokio::join!(reader, writer) } => match pair {
                (Ok(read), Ok(wrote)) => read.and(wrote),
                _ => Err(CoreError::custom("exec: pump task failed")),
            },
            _ = stop_token.cancelled() => {
                eio.output_close();
                eio.input_close();
                let _ = child.kill().await;
                return Err(CoreError::Stopped);
            }
        };

        let status = child.wait().await?;
        if !status.success() {
            return Err(CoreError::custom(format!("exec: child {status}")));
        }
        result
    }
}
