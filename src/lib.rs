use std::env;
use std::path::PathBuf;
use clap::Parser;
use futures::channel::mpsc::{channel, Receiver};
use futures::StreamExt;
use log::{error, info, warn};
use tokio::time::Instant;

use crate::config::io::ConfigIO;
use crate::device::btle::BtleTransport;
use crate::device::constants::EVENT_CHANNEL_CAPACITY;
use crate::device::types::DeviceHandle;
use crate::error::AppRunError;
use crate::session::core::{session_start_hour, Session};
use crate::session::scheduler::Scheduler;
use crate::session::session_task::start_session;
use crate::session::types::SessionEvent;

pub mod chart;
pub mod config;
pub mod device;
pub mod error;
pub mod session;
pub mod telemetry;

pub fn init_logging(level: log::LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Charts the output of a bluetooth solar inverter monitor.\n\nExample: inverter-chart --address AA:BB:CC:DD:EE:FF", long_about = None)]
pub struct Args {
    /// Bluetooth address of the inverter monitor
    #[arg(long)]
    pub address: String,

    /// Display name of the device, defaults to the address
    #[arg(long)]
    pub name: Option<String>,

    /// Use this config file instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the aggregation window length, in seconds
    #[arg(long)]
    pub window_secs: Option<u64>,

    /// Log debug messages
    #[arg(long)]
    pub verbose: bool,
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Ready => info!("Receiving notifications"),
        SessionEvent::Metrics(metrics) => info!(
            "Voltage {:.1} V ({:.0}%), power {:.1} W ({:.0}%), efficiency {:.1}%, {:?}",
            metrics.voltage,
            metrics.voltage_percent,
            metrics.power,
            metrics.power_percent,
            metrics.efficiency_percent,
            metrics.grid_mode(),
        ),
        SessionEvent::MetricsReset => info!("Metrics reset"),
        SessionEvent::CumulativeOutput(average) => info!("Cumulative output {:.2}", average),
        SessionEvent::ElapsedHours(_) => {},
        SessionEvent::Chart(feed) => {
            if let Some((x, y)) = feed.line.last() {
                info!("Chart has {} points, latest at x={} y={:.2}", feed.line.len(), x, y);
            }
        },
        SessionEvent::Notice(message) => warn!("{}", message),
        SessionEvent::Ended(None) => info!("Session ended"),
        SessionEvent::Ended(Some(err)) => error!("Session ended: {}", err),
    }
}

async fn console_task(mut events: Receiver<SessionEvent>) {
    while let Some(event) = events.next().await {
        log_event(&event);
    }
}

pub async fn run(args: Args) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(args.config.as_deref())?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let mut config = config_io.read_or_create().await?;
    if let Some(window_secs) = args.window_secs {
        config.timing.window_millis = window_secs.saturating_mul(1000);
    }
    config.timing.validate()?;

    let (transport_tx, transport_rx) = channel(EVENT_CHANNEL_CAPACITY);
    let (tick_tx, tick_rx) = channel(EVENT_CHANNEL_CAPACITY);
    let (event_tx, event_rx) = channel(EVENT_CHANNEL_CAPACITY);

    let transport = BtleTransport::open(transport_tx).await?;
    let transport_tasks = transport.tasks();
    let session = Session::new(transport, Scheduler::new(tick_tx), &config, session_start_hour(), Instant::now());

    let name = args.name.unwrap_or_else(|| args.address.clone());
    let device = DeviceHandle::new(name, args.address);
    info!("Connecting to {} ({})", device.id(), device.address());

    let mut handle = start_session(session, device, transport_rx, tick_rx, vec![event_tx])?;
    let console = tokio::spawn(console_task(event_rx));

    let interrupted = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            result
        },
        _ = handle.stopped() => Ok(()),
    };

    handle.teardown().await;
    transport_tasks.closed().await;
    if let Err(err) = console.await {
        error!("Console task failed: {}", err);
    }
    Ok(interrupted?)
}
