//! Bus forwarder: relays every published message to every subscriber.

use anyhow::{Context, Result};
use clap::Parser;
use devices::cli::init_tracing;
use devices::forwarder::Forwarder;
use shared::endpoint::Endpoint;

#[derive(Parser, Debug)]
#[command(name = "scope_forwarder")]
#[command(about = "Fan-out relay between device publishers and subscribers")]
struct Args {
    /// Where devices publish to
    #[arg(long, default_value = "5000")]
    inbound: Endpoint,

    /// Where devices subscribe from
    #[arg(long, default_value = "5001")]
    outbound: Endpoint,

    /// Operator client's control publisher
    #[arg(long, default_value = "L4862")]
    control: Endpoint,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let ctx = zmq::Context::new();
    let forwarder = Forwarder::from_endpoints(&ctx, &args.inbound, &args.outbound, &args.control)
        .context("failed to open forwarder sockets")?;
    forwarder.run().context("forwarder failed")?;
    Ok(())
}
