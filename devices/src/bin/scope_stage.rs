//! Stage device backed by the simulated motor and LED controller.

use anyhow::{Context, Result};
use clap::Parser;
use devices::cli::{cancel_on_ctrlc, init_tracing, BusArgs};
use devices::stage::{SimulatedStage, StageCore, StageDevice};
use shared::reactor::Reactor;

#[derive(Parser, Debug)]
#[command(name = "scope_stage")]
#[command(about = "Motorized stage and LED controller")]
struct Args {
    #[command(flatten)]
    bus: BusArgs,

    /// Device name on the bus
    #[arg(long, default_value = "stage")]
    name: String,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let ctx = zmq::Context::new();
    let (commands, publisher) = args.bus.connect(&ctx, &args.name)?;
    let reactor = Reactor::new(&ctx).context("failed to create reactor")?;

    let core = StageCore::new(args.name, SimulatedStage::new(), publisher);
    let stage = StageDevice::new(reactor, commands, core).context("failed to enable stage")?;
    cancel_on_ctrlc(stage.cancel_handle())?;
    stage.run().context("stage failed")?;
    Ok(())
}
