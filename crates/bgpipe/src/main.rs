//! bgpipe - BGP pipeline runtime
//!
//! # Usage
//!
//! ```bash
//! # dial a peer, print the session as JSON lines
//! bgpipe speaker 192.0.2.1:179
//!
//! # replay an MRT file
//! bgpipe dump.mrt -- stdout
//!
//! # filter a relayed session
//! bgpipe tcp 192.0.2.1:179 -- grep --type UPDATE -- listen :179
//! ```

use anyhow::Result;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bgpipe_core::{Pipeline, Registry};

fn usage(pipeline: &Pipeline) {
    eprintln!(
        "Usage: bgpipe [OPTIONS] [--] STAGE [STAGE-OPTIONS] [STAGE-ARGUMENTS...] [--] ...\n"
    );
    eprintln!("Options:");
    eprintln!("  --log LEVEL       log level (trace/debug/info/warn/error)");
    eprintln!("  --reverse         reverse the pipeline");
    eprintln!("  --silent          do not attach an automatic stdout stage");
    eprintln!("  --stdin           attach an automatic stdin stage");
    eprintln!("  --events LIST     log the given pipe events");
    eprintln!("  --short-asn       use 2-byte ASN numbers\n");
    eprintln!("Supported stages (run: stage names double as addresses and file paths)");
    eprintln!("{}", pipeline.usage());
}

#[tokio::main]
async fn main() {
    std::process::exit(match run().await {
        Ok(()) => 0,
        Err(_) => 1,
    });
}

async fn run() -> Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let mut registry = Registry::new();
    bgpipe_stages::register_all(&mut registry);
    let mut pipeline = Pipeline::new(registry);

    if argv.iter().any(|a| a == "-h" || a == "--help") {
        usage(&pipeline);
        return Ok(());
    }

    // configure before logging init, so --log can shape the filter
    if let Err(err) = pipeline.configure(&argv) {
        eprintln!("bgpipe: configuration error: {err}");
        usage(&pipeline);
        anyhow::bail!(err);
    }
    init_logging(&pipeline.globals.log)?;

    if let Err(err) = pipeline.attach() {
        error!(%err, "could not attach stages to the pipe");
        anyhow::bail!(err);
    }

    // first ^C asks for a clean stop, carrying the cause into Wait
    let cancel = pipeline.cancel_cause().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel(bgpipe_core::CoreError::custom("interrupted"));
        }
    });

    pipeline.start().await;
    if let Err(cause) = pipeline.wait().await {
        error!(%cause, "fatal error");
        anyhow::bail!(cause);
    }
    Ok(())
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}
