//! Camera device publishing frames from the synthetic specimen source.

use anyhow::{Context, Result};
use clap::Parser;
use devices::camera::{CameraCore, CameraDevice};
use devices::cli::{cancel_on_ctrlc, init_tracing, BusArgs};
use shared::camera_interface::{FrameSource, SyntheticSource, Timing};
use shared::endpoint::Endpoint;
use shared::frame_channel::TimestampedPublisher;
use shared::reactor::Reactor;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "scope_camera")]
#[command(about = "Frame source publishing timestamped frames")]
struct Args {
    #[command(flatten)]
    bus: BusArgs,

    /// Device name on the bus
    #[arg(long, default_value = "camera_behavior")]
    name: String,

    /// Frame output socket
    #[arg(long, default_value = "5004")]
    data_out: Endpoint,

    /// Sensor height in pixels
    #[arg(long, default_value = "512")]
    height: usize,

    /// Sensor width in pixels
    #[arg(long, default_value = "512")]
    width: usize,

    /// Seed for the synthetic specimen's noise
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Exposure time in microseconds
    #[arg(long, default_value = "18000")]
    exposure_us: u64,

    /// Frames per second
    #[arg(long, default_value = "20")]
    frame_rate: f64,

    /// Start acquiring immediately instead of waiting for `start`
    #[arg(long)]
    start: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut source = SyntheticSource::new(args.height, args.width, args.seed);
    source
        .set_timing(Timing {
            exposure: Duration::from_micros(args.exposure_us),
            frame_rate: args.frame_rate,
        })
        .context("invalid exposure or frame rate")?;
    if args.start {
        source.start().context("failed to start acquisition")?;
    }

    let ctx = zmq::Context::new();
    let output = TimestampedPublisher::from_endpoint(&ctx, &args.data_out, source.format())
        .with_context(|| format!("failed to open frame output {}", args.data_out))?;
    let (commands, publisher) = args.bus.connect(&ctx, &args.name)?;
    let reactor = Reactor::new(&ctx).context("failed to create reactor")?;

    let core = CameraCore::new(args.name, source, output, publisher);
    let camera = CameraDevice::new(reactor, commands, core)?;
    cancel_on_ctrlc(camera.cancel_handle())?;
    camera.run().context("camera failed")?;
    Ok(())
}
