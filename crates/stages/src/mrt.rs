//! MRT file replay stage

use std::sync::Arc;

use async_trait::async_trait;
use clap::Command;
use tracing::info;

use bgpipe_core::{CoreError, Result, Stage, StageOptions, StageRef, StageSpec};
use bgpipe_extio::{extio_flags, Extio, ExtioMode, Repr};

pub(crate) fn spec() -> StageSpec {
    StageSpec {
        options: StageOptions {
            descr: "read MRT file with BGP4MP messages",
            args: &["path"],
            is_producer: true,
            ..Default::default()
        },
        command: || extio_flags(Command::new("mrt"), ExtioMode::ReadOnly),
        ctor: Box::new(|| Box::new(MrtStage::default())),
    }
}

/// Replays the BGP4MP records of an MRT file into the pipe, in file order.
/// Records that carry no BGP message are skipped silently.
#[derive(Default)]
pub struct MrtStage {
    path: String,
    eio: Option<Arc<Extio>>,
}

#[async_trait]
impl Stage for MrtStage {
    fn attach(&mut self, base: &StageRef) -> Result<()> {
        self.path = base
            .cfg()
            .arg("path")
            .ok_or_else(|| CoreError::MissingArgument("path".to_string()))?
            .to_string();
        self.eio = Some(Extio::attach_with(base, ExtioMode::ReadOnly, Repr::Mrt)?);
        Ok(())
    }

    async fn run(&mut self, base: StageRef) -> Result<()> {
        let eio = self
            .eio
            .clone()
            .ok_or_else(|| CoreError::custom("mrt: not attached"))?;

        let file = tokio::fs::File::open(&self.path).await?;
        let stop_token = base.stop_token();
        let result = tokio::select! {
            result = eio.read_stream(file, None) => result,
            _ = stop_token.cancelled() => Err(CoreError::Stopped),
        };

        let parsed = eio.metrics().snapshot().parsed;
        info!(path = %self.path, parsed, "MRT replay finished");
        result
    }
}
