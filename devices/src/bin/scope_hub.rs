//! Hub: turns operator requests into bus broadcasts.

use anyhow::{Context, Result};
use clap::Parser;
use devices::cli::{cancel_on_ctrlc, init_tracing, BusArgs};
use devices::hub::{HubConfig, HubCore, HubDevice};
use shared::endpoint::Endpoint;
use shared::reactor::Reactor;
use shared::zmq::Server;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "scope_hub")]
#[command(about = "Synchronous command router for the scope devices")]
struct Args {
    #[command(flatten)]
    bus: BusArgs,

    /// Operator request socket
    #[arg(long, default_value = "5002")]
    server: Endpoint,

    /// Device name on the bus
    #[arg(long, default_value = "hub")]
    name: String,

    /// JSON file with device names and stage axis directions
    #[arg(long, default_value = "configs.json")]
    config: PathBuf,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = HubConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    info!(
        "axis directions x={} y={} z={}",
        config.x_dir, config.y_dir, config.z_dir
    );

    let ctx = zmq::Context::new();
    let server = Server::from_endpoint(&ctx, &args.server)
        .with_context(|| format!("failed to open request socket {}", args.server))?;
    let (commands, publisher) = args.bus.connect(&ctx, &args.name)?;
    let reactor = Reactor::new(&ctx).context("failed to create reactor")?;

    let core = HubCore::new(args.name, config, publisher);
    let hub = HubDevice::new(reactor, server, commands, core)?;
    cancel_on_ctrlc(hub.cancel_handle())?;
    hub.run().context("hub failed")?;
    Ok(())
}
