//! Minimal in-process BGP speaker

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Arg, Command};
use tracing::{debug, info};

use bgpipe_core::{CoreError, Result, Stage, StageOptions, StageRef, StageSpec};
use bgpipe_msg::{encode_open, Caps, Dir, Msg, MsgType};
use bgpipe_pipe::{Event, EventBus, Input, MsgHandler};

pub(crate) fn spec() -> StageSpec {
    StageSpec {
        options: StageOptions {
            descr: "run a simple BGP speaker",
            is_producer: true,
            ..Default::default()
        },
        command: || {
            Command::new("speaker")
                .arg(
                    Arg::new("asn")
                        .long("asn")
                        .value_name("ASN")
                        .default_value("65000")
                        .help("local AS number"),
                )
                .arg(
                    Arg::new("id")
                        .long("id")
                        .value_name("IP")
                        .default_value("0.0.0.1")
                        .help("local BGP identifier"),
                )
                .arg(
                    Arg::new("hold")
                        .long("hold")
                        .value_name("SECONDS")
                        .default_value("90")
                        .help("hold timer to advertise; keepalives at hold/3"),
                )
        },
        ctor: Box::new(|| Box::new(SpeakerStage::default())),
    }
}

/// Replies KEEPALIVE to the peer's OPEN and announces the session
struct OpenResponder {
    input: Arc<Input>,
    events: Arc<EventBus>,
    established: AtomicBool,
}

#[async_trait]
impl MsgHandler for OpenResponder {
    async fn on_msg(&self, _msg: &mut Msg) -> bool {
        let _ = self.input.write_msg(Msg::keepalive()).await;
        if !self.established.swap(true, Ordering::Relaxed) {
            info!("peer OPEN received");
            self.events
                .publish(Event::new("speaker.ESTABLISHED"))
                .await;
        }
        true
    }
}

/// Opens a BGP session over the pipe: sends OPEN with the configured
/// parameters, answers the peer's OPEN, and emits periodic keepalives.
pub struct SpeakerStage {
    asn: u32,
    hold: u16,
    id: Ipv4Addr,
    caps: Caps,
    input: Option<Arc<Input>>,
}

impl Default for SpeakerStage {
    fn default() -> Self {
        Self {
            asn: 65000,
            hold: 90,
            id: Ipv4Addr::UNSPECIFIED,
            caps: Caps::default(),
            input: None,
        }
    }
}

#[async_trait]
impl Stage for SpeakerStage {
    fn attach(&mut self, base: &StageRef) -> Result<()> {
        let cfg = base.cfg();
        self.asn = parse_flag(&cfg.str_opt("asn"), 65000, "asn")?;
        self.hold = parse_flag(&cfg.str_opt("hold"), 90, "hold")?;
        self.id = cfg
            .str_opt("id")
            .unwrap_or_else(|| "0.0.0.1".to_string())
            .parse()
            .map_err(|_| CoreError::custom("speaker: invalid --id"))?;
        self.caps = base.pipe().caps.read().clone();

        let own = if base.is_left() { Dir::L } else { Dir::R };
        let input = base.add_input(own);

        // the peer's messages arrive on the opposite flow
        base.on_msg(
            own.flip(),
            Box::new(OpenResponder {
                input: input.clone(),
                events: base.events().clone(),
                established: AtomicBool::new(false),
            }),
            vec![MsgType::OPEN],
        );

        self.input = Some(input);
        Ok(())
    }

    async fn run(&mut self, base: StageRef) -> Result<()> {
        let input = self
            .input
            .clone()
            .ok_or_else(|| CoreError::custom("speaker: not attached"))?;

        let open = encode_open(self.asn, self.hold, self.id, &self.caps);
        input.write_msg(Msg::raw(MsgType::OPEN, open)).await?;
        input.write_msg(Msg::keepalive()).await?;
        debug!(asn = self.asn, hold = self.hold, "OPEN sent");

        if self.hold == 0 {
            base.stop_token().cancelled().await;
            return Err(CoreError::Stopped);
        }

        let period = Duration::from_secs((self.hold as u64 / 3).max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // the immediate first tick
        let stop_token = base.stop_token();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if input.write_msg(Msg::keepalive()).await.is_err() {
                        return Ok(()); // pipe is collapsing
                    }
                }
                _ = stop_token.cancelled() => return Err(CoreError::Stopped),
            }
        }
    }
}

fn parse_flag<T: std::str::FromStr>(
    value: &Option<String>,
    default: T,
    name: &str,
) -> Result<T> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| CoreError::custom(format!("speaker: invalid --{name}"))),
    }
}
