//! Operator console: one hub request per stdin line.

use anyhow::{Context, Result};
use clap::Parser;
use devices::bus_log::BusLog;
use devices::cli::init_tracing;
use devices::client::OperatorClient;
use shared::endpoint::Endpoint;
use shared::zmq::{Client, Publisher};
use std::io;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "scope_client")]
#[command(about = "Sends operator commands to the hub")]
struct Args {
    /// Hub request socket
    #[arg(long, default_value = "L5002")]
    server: Endpoint,

    /// Forwarder control channel
    #[arg(long, default_value = "4862")]
    control: Endpoint,

    /// Forwarder inbound side, for mirroring requests to the logger
    #[arg(long, default_value = "L5000")]
    outbound: Endpoint,

    /// Seconds to wait for each hub reply
    #[arg(long, default_value = "10")]
    timeout_s: u64,

    /// Device name used in log lines
    #[arg(long, default_value = "client")]
    name: String,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let ctx = zmq::Context::new();
    let client = Client::from_endpoint(&ctx, &args.server)
        .with_context(|| format!("failed to connect to hub at {}", args.server))?;
    client
        .set_timeout(Duration::from_secs(args.timeout_s))
        .context("failed to set request timeout")?;
    let control = Publisher::from_endpoint(&ctx, &args.control)
        .with_context(|| format!("failed to open control channel {}", args.control))?;
    let bus = Publisher::from_endpoint(&ctx, &args.outbound)
        .with_context(|| format!("failed to connect to bus at {}", args.outbound))?;

    let operator = OperatorClient::new(client, control, BusLog::new(args.name, Arc::new(bus)));
    operator
        .run(io::stdin().lock())
        .context("operator session failed")?;
    Ok(())
}
