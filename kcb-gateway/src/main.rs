use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use kcb_gateway::api::{self, AppState};
use kcb_gateway::bus::LinuxBus;
use kcb_gateway::channel::SerialChannel;
use kcb_gateway::config::Config;
use kcb_gateway::error;
use kcb_gateway::gateway::Gateway;
use kcb_gateway::tracing::{self, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();

    let config = Config::from_env().context("loading configuration")?;
    debug!(?config, "Loaded configuration");

    // Without the controller there is nothing to serve
    let (channel, bus) = open_devices(&config)?;
    let gateway = Gateway::new(channel.clone(), Arc::new(bus), config.decode_policy);

    let listener = TcpListener::bind(config.server.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr()))?;

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    {
        let running = running.clone();
        tracker.spawn(async move {
            if let Err(e) = api::serve(listener, AppState::new(gateway), running.clone()).await {
                error!(error = %e, "API server failed");
                running.cancel();
            }
        });
    }
    tracker.close();
    info!(device = %config.serial.device, "Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = running.cancelled() => {},
    }

    trace!("Shutting down.");
    running.cancel();

    tracker.wait().await;
    channel.close().await;
    info!("Exiting.");
    Ok(())
}

fn open_devices(config: &Config) -> error::Result<(Arc<SerialChannel>, LinuxBus)> {
    let channel = SerialChannel::open(
        &config.serial.device,
        config.serial.baud_rate,
        config.serial.timeout,
    )?;
    let bus = LinuxBus::open(config.bus.i2c.as_deref(), config.bus.spi.as_deref())?;
    Ok((Arc::new(channel), bus))
}
