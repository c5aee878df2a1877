//! Tracker device: closes the loop between a camera stream and the stage.

use anyhow::{Context, Result};
use clap::Parser;
use devices::cli::{cancel_on_ctrlc, init_tracing, BusArgs};
use devices::tracker_device::{TrackerCore, TrackerDevice, TrackerOutputs};
use shared::endpoint::Endpoint;
use shared::frame::{FrameFormat, PixelType};
use shared::frame_channel::{TimestampedPublisher, TimestampedSubscriber};
use shared::reactor::Reactor;
use std::path::PathBuf;
use tracing::info;
use tracker::{Tracker, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "scope_tracker")]
#[command(about = "Per-frame specimen tracking and stage velocity control")]
struct Args {
    #[command(flatten)]
    bus: BusArgs,

    /// Device name on the bus
    #[arg(long, default_value = "tracker_behavior")]
    name: String,

    /// Camera frame input
    #[arg(long, default_value = "L5004")]
    data_in: Endpoint,

    /// Raw frame output for the writer
    #[arg(long, default_value = "5006")]
    writer_out: Endpoint,

    /// Annotated frame output for the display
    #[arg(long, default_value = "5007")]
    display_out: Endpoint,

    /// Frame output for an external model device
    #[arg(long)]
    model_out: Option<Endpoint>,

    /// Bus name of the external model device
    #[arg(long)]
    model_device: Option<String>,

    /// Frame format of the camera stream
    #[arg(long, default_value = "UINT8_YX_512_512")]
    format: FrameFormat,

    /// JSON file overriding tracker tuning constants
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only forward frames to the writer and display
    #[arg(long)]
    passthrough: bool,

    /// Mirror incoming frames horizontally
    #[arg(long)]
    flip_image: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    let tracker = Tracker::new(config, args.format.shape()).context("invalid tracker config")?;

    let ctx = zmq::Context::new();
    let (height, width) = args.format.shape();
    let display_format = FrameFormat::new(PixelType::U8, height, width);
    let frames = TimestampedSubscriber::from_endpoint(&ctx, &args.data_in, args.format.clone())
        .with_context(|| format!("failed to open frame input {}", args.data_in))?;
    let model = match &args.model_out {
        Some(endpoint) => Some(
            TimestampedPublisher::from_endpoint(&ctx, endpoint, display_format.clone())
                .with_context(|| format!("failed to open model output {}", endpoint))?,
        ),
        None => None,
    };
    let outputs = TrackerOutputs {
        writer: TimestampedPublisher::from_endpoint(&ctx, &args.writer_out, args.format.clone())
            .with_context(|| format!("failed to open writer output {}", args.writer_out))?,
        display: TimestampedPublisher::from_endpoint(&ctx, &args.display_out, display_format)
            .with_context(|| format!("failed to open display output {}", args.display_out))?,
        model,
    };
    let (commands, publisher) = args.bus.connect(&ctx, &args.name)?;
    let reactor = Reactor::new(&ctx).context("failed to create reactor")?;

    let mut core = TrackerCore::new(args.name, tracker, outputs, publisher)
        .with_passthrough(args.passthrough)
        .with_flip(args.flip_image);
    if let Some(device) = args.model_device {
        info!("relaying model modes to {}", device);
        core = core.with_model_device(device);
    }
    let device = TrackerDevice::new(reactor, commands, frames, core)?;
    cancel_on_ctrlc(device.cancel_handle())?;
    device.run().context("tracker failed")?;
    Ok(())
}
