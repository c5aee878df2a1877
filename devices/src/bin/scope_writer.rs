//! Writer device recording a frame stream to disk.

use anyhow::{Context, Result};
use clap::Parser;
use devices::cli::{cancel_on_ctrlc, init_tracing, BusArgs};
use devices::writer::{WriterCore, WriterDevice, WriterSettings};
use shared::endpoint::Endpoint;
use shared::frame::FrameFormat;
use shared::frame_channel::TimestampedSubscriber;
use shared::reactor::Reactor;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "scope_writer")]
#[command(about = "Records timestamped frames to chunk files")]
struct Args {
    #[command(flatten)]
    bus: BusArgs,

    /// Device name on the bus
    #[arg(long, default_value = "writer_behavior")]
    name: String,

    /// Frame input socket (the tracker's writer output)
    #[arg(long, default_value = "L5006")]
    data_in: Endpoint,

    /// Frame format, e.g. UINT8_YX_512_512
    #[arg(long, default_value = "UINT8_YX_512_512")]
    format: FrameFormat,

    /// Parent directory for session directories
    #[arg(long, default_value = ".")]
    directory: PathBuf,

    /// Frames per chunk file
    #[arg(long, default_value = "3600")]
    max_frames_per_file: usize,

    /// Frames the disk worker may fall behind by before dropping
    #[arg(long, default_value = "256")]
    queue_size: usize,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let ctx = zmq::Context::new();
    let frames = TimestampedSubscriber::from_endpoint(&ctx, &args.data_in, args.format.clone())
        .with_context(|| format!("failed to open frame input {}", args.data_in))?;
    let (commands, publisher) = args.bus.connect(&ctx, &args.name)?;
    let reactor = Reactor::new(&ctx).context("failed to create reactor")?;

    let settings = WriterSettings {
        directory: args.directory,
        max_frames_per_file: args.max_frames_per_file,
        queue_size: args.queue_size,
    };
    let core = WriterCore::new(args.name, settings, args.format, publisher);
    let writer = WriterDevice::new(reactor, commands, frames, core)?;
    cancel_on_ctrlc(writer.cancel_handle())?;
    writer.run().context("writer failed")?;
    Ok(())
}
