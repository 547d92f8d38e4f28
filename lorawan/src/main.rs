//! `lorawan-sim`: emulated LoRaWAN end-device behind a packet forwarder.
//!
//! Loads a TOML configuration, activates the device (ABP, or OTAA through
//! the network server) and then sends a Cayenne LPP reading every
//! `uplink.interval_secs` seconds.
//!
//! ```text
//! RUST_LOG=debug lorawan-sim --config config/otaa.toml --count 5
//! ```

use std::path::PathBuf;
use std::thread;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lorawan_sim::config::SimConfig;
use lorawan_sim::device::{DeviceError, LoRaWANDevice};
use lorawan_sim::gateway::{Gateway, UdpLink};
use lorawan_sim::lorawan::MacError;
use lorawan_sim::telemetry::SensorSimulator;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LoRaWAN end-device emulator.
///
/// Frames are reported to the network server over the Semtech UDP
/// packet-forwarder protocol as if a gateway had received them.
#[derive(Debug, Parser)]
#[command(name = "lorawan-sim", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/otaa.toml", env = "LORAWAN_SIM_CONFIG")]
    config: PathBuf,

    /// Stop after this many uplinks. Runs until interrupted when omitted.
    #[arg(short = 'n', long)]
    count: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = SimConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let device_config = config.device_config()?;
    let phy = config.phy_config()?;
    let gateway_eui = config.gateway_eui()?;

    let link = UdpLink::connect(config.gateway.server.as_str(), config.receive_timeout())
        .with_context(|| format!("connecting to {}", config.gateway.server))?;
    info!(
        server = %config.gateway.server,
        gateway = %gateway_eui,
        dev_eui = %device_config.dev_eui(),
        modulation = %phy.modulation,
        "emulator starting"
    );

    let gateway = Gateway::new(link, gateway_eui, phy, config.receive_timeout());
    let mut device = LoRaWANDevice::new(gateway, device_config, config.retry_policy());
    device.activate().context("device activation failed")?;

    let mut sensor = SensorSimulator::new();
    let mut sent: u64 = 0;
    loop {
        let fcnt = device.session().map(|s| s.fcnt_up).unwrap_or_default();
        let payload = sensor.sample(fcnt).to_lpp().context("encoding reading")?;

        match device.send_uplink(config.f_port(), payload.as_bytes()) {
            Ok(report) => {
                sent += 1;
                info!(fcnt = report.fcnt, token = report.token, "uplink #{} sent", sent);
            }
            Err(DeviceError::Mac(MacError::FrameCounterExhausted)) => {
                anyhow::bail!("frame counter exhausted; the device must rejoin");
            }
            Err(e) => error!(fcnt, "uplink failed: {}", e),
        }

        if cli.count.is_some_and(|count| sent >= count) {
            break;
        }
        thread::sleep(config.uplink_interval());
    }

    info!(sent, "done");
    Ok(())
}
