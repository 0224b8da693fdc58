//! Daemon entry point: loads configuration, opens a KISS-over-TCP
//! connection per configured port, and wires up C4 through C9 on each.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::net::TcpStream;
use tokio::signal;

use ax25aprs::aprs_interface::APRSInterface;
use ax25aprs::ax25::Modulo;
use ax25aprs::callsign::Callsign;
use ax25aprs::config::Config;
use ax25aprs::digipeater::APRSDigipeater;
use ax25aprs::interface::{AX25Interface, FrameSink};
use ax25aprs::kiss::KissDevice;
use ax25aprs::router::Router;
use ax25aprs::time;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "/etc/ax25aprsd.conf")]
    config: PathBuf,

    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if args.debug {
        "debug"
    } else {
        "info"
    }))
    .init();

    let config = Config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    let local_call = Callsign::parse(&config.mycall).context("invalid mycall")?;
    info!("Starting ax25aprsd for {local_call}");

    // Kept alive for the daemon's lifetime: dropping these would tear down
    // their Signal subscriptions on the underlying AX25Interface, and a
    // dropped KissDevice never gets a chance to run its close sequence.
    let mut devices = Vec::new();
    let mut interfaces = Vec::new();
    let mut digipeaters = Vec::new();

    for port in &config.ports {
        let stream = TcpStream::connect(&port.device)
            .await
            .with_context(|| format!("connecting to TNC at {}", port.device))?;
        let device = KissDevice::open(stream, 1, port.kiss_device_config())
            .await
            .with_context(|| format!("initializing KISS device on {}", port.device))?;
        let kiss_port = device.port(0)?;

        let sink: Arc<dyn FrameSink> = kiss_port.clone();
        let random = time::system_random();
        let iface = AX25Interface::new(
            sink,
            &kiss_port.received,
            Arc::new(Router::new()),
            random.clone(),
            Modulo::Mod8,
            port.interface_config(),
        );

        // Wires the port's close signal (emitted by `KissDevice::close`)
        // through to this interface's queued transmits and C7's message
        // handlers (§5/§7).
        let iface_for_close = iface.clone();
        kiss_port.closed.connect(move |_| iface_for_close.close());

        devices.push(device);

        let aprs_config = config.aprs.interface_config(local_call)?;
        let retry_config = config.aprs.retry_config();
        let aprs = APRSInterface::new(iface.clone(), random, aprs_config, retry_config)
            .with_context(|| format!("configuring APRS interface for {}", port.device))?;
        interfaces.push(aprs);

        if let Some(digi) = &config.digipeater {
            if digi.enabled {
                let digipeater = APRSDigipeater::new(local_call, digi.digipeater_timeout());
                digipeater.add_aliases(digi.aliases.iter().cloned());
                digipeater.connect(iface);
                digipeaters.push(digipeater);
            }
        }

        info!("Listening on {}", port.device);
    }

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }

    for device in devices {
        device.close().await;
    }

    Ok(())
}
