//! Shared command-line plumbing for the device binaries.

use anyhow::{Context, Result};
use clap::Args;
use shared::endpoint::Endpoint;
use shared::reactor::CancelHandle;
use shared::zmq::{Publisher, Subscriber};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Connections to the forwarder shared by every bus device.
#[derive(Args, Debug, Clone)]
pub struct BusArgs {
    /// Commands from the forwarder's outbound side
    #[arg(long, default_value = "L5001")]
    pub inbound: Endpoint,

    /// Messages to the forwarder's inbound side
    #[arg(long, default_value = "L5000")]
    pub outbound: Endpoint,
}

impl BusArgs {
    /// Open the command subscription for `topic` and the shared bus publisher.
    pub fn connect(&self, ctx: &zmq::Context, topic: &str) -> Result<(Subscriber, Arc<Publisher>)> {
        let commands = Subscriber::from_endpoint(ctx, &self.inbound, &[topic])
            .with_context(|| format!("failed to subscribe on {}", self.inbound))?;
        let publisher = Publisher::from_endpoint(ctx, &self.outbound)
            .with_context(|| format!("failed to open publisher on {}", self.outbound))?;
        Ok((commands, Arc::new(publisher)))
    }
}

/// Install the fmt subscriber, honoring `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Cancel `handle` on Ctrl-C.
pub fn cancel_on_ctrlc(handle: CancelHandle) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("interrupt received, shutting down");
        handle.cancel();
    })
    .context("failed to install Ctrl-C handler")
}
