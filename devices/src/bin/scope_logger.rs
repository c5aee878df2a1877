//! Logger device: the bus log stream on disk.

use anyhow::{Context, Result};
use clap::Parser;
use devices::bus_log::LOGGER;
use devices::cli::{cancel_on_ctrlc, init_tracing};
use devices::logger::{LoggerCore, LoggerDevice};
use shared::endpoint::Endpoint;
use shared::reactor::Reactor;
use shared::zmq::Subscriber;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "scope_logger")]
#[command(about = "Appends bus log lines to a timestamped text file")]
struct Args {
    /// Forwarder outbound side
    #[arg(long, default_value = "L5001")]
    inbound: Endpoint,

    /// Directory for log files
    #[arg(long, default_value = ".")]
    directory: PathBuf,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let ctx = zmq::Context::new();
    let commands = Subscriber::from_endpoint(&ctx, &args.inbound, &[LOGGER])
        .with_context(|| format!("failed to subscribe on {}", args.inbound))?;
    let reactor = Reactor::new(&ctx).context("failed to create reactor")?;

    let core = LoggerCore::new(&args.directory)
        .with_context(|| format!("failed to open log file in {}", args.directory.display()))?;
    let logger = LoggerDevice::new(reactor, commands, core)?;
    cancel_on_ctrlc(logger.cancel_handle())?;
    logger.run().context("logger failed")?;
    Ok(())
}
