//! blobprobe binary.
//!
//! Usage: `blobprobe [connection-string] [container-name]`

#![forbid(unsafe_code)]

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use blobprobe::config::{LOG_FORMAT_ENV, ProbeArgs, ProbeConfig};
use blobprobe::logging::{self, LogFormat};
use blobprobe::runner::ProbeRunner;
use blobprobe::stop;
use blobprobe_store::AzureBlobStorage;
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init(LogFormat::from_env_value(
        std::env::var(LOG_FORMAT_ENV).ok().as_deref(),
    ));

    match run(ProbeArgs::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ProbeArgs) -> anyhow::Result<()> {
    let config = match ProbeConfig::from_env(&args) {
        Ok(config) => config,
        Err(err) => {
            println!("{err}");
            return Ok(());
        }
    };

    let storage = AzureBlobStorage::new(&config.connection_string, &config.container_name)
        .context("invalid storage settings")?;
    info!(container = storage.container(), "Storage configured");

    println!("Starting reader/writer...");
    let probe = ProbeRunner::new(Arc::new(storage)).start();
    println!("Reader/writer now running...");
    println!("Press any key to stop.");

    let trigger = stop::wait_for_stop().await;
    info!(trigger = ?trigger, "Stop requested");
    probe.cancel();

    let report = probe.stop().await?;
    println!("{}", report.reader_summary);
    println!("{}", report.writer_summary);

    // A broken stdin still stops the probe; surface it after a clean join.
    trigger.context("failed to read the stop key")?;

    println!("Done.");
    Ok(())
}
