//! Scan acquisition binary
//!
//! Usage:
//!   lumos-acquire --medium tcp --address 192.168.0.10 --number 2111
//!   lumos-acquire --config config/lumos.toml --continuous
//!   lumos-acquire --medium virtual --continuous --cycles 20
//!   lumos-acquire --list-ports

use anyhow::{Context, Result};
use clap::Parser;
use lumos_acquisition::{
    run, spawn_event_logger, Acquisition, CycleSettings, RunMode, ScanBuffer, ScanProfile,
    VirtualDevice,
};
use lumos_config::LumosConfig;
use lumos_network::{
    available_serial_ports, Connection, Transport, TransportDescriptor, TransportFactory,
    TransportOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "lumos-acquire")]
#[command(about = "Acquire LiDAR scans over TCP, UDP or a serial port")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Link medium (tcp, udp, serial, virtual)
    #[arg(short, long)]
    medium: Option<String>,

    /// Device host, or serial device path
    #[arg(short, long)]
    address: Option<String>,

    /// Device port, or serial baud rate
    #[arg(short, long)]
    number: Option<u32>,

    /// Keep acquiring until interrupted
    #[arg(long)]
    continuous: bool,

    /// Pace of continuous acquisition in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop a continuous run after this many cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Print the serial ports on this machine and exit
    #[arg(long)]
    list_ports: bool,

    /// Print the last scan as JSON on exit
    #[arg(long)]
    dump_json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = LumosConfig::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args)?;

    init_logging(&config)?;

    if args.list_ports {
        for port in available_serial_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    info!("Starting Lumos acquisition");
    info!(
        medium = %config.link.medium,
        address = %config.link.address,
        number = config.link.number,
        "Link target"
    );

    let transport = build_transport(&config)?;
    let connection = Arc::new(Connection::new("device", transport));
    let _event_logger = spawn_event_logger(&connection);

    connection
        .connect(config.link.connect_timeout())
        .await
        .map_err(|e| {
            error!("Failed to connect: {}", e);
            e
        })
        .context("Device link could not be opened")?;
    connection.set_watchdog(config.link.watchdog())?;

    let acquisition = Acquisition::new(
        Arc::clone(&connection),
        CycleSettings::from(&config.acquisition),
    )?;

    let mode = if args.continuous {
        RunMode::Continuous {
            interval: config.acquisition.interval(),
        }
    } else {
        RunMode::Single
    };

    // Set up signal handlers
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = stop_tx.send(true);
        }
    });

    let mut scan = ScanBuffer::new();
    let summary = run(&acquisition, mode, &mut scan, stop_rx, args.cycles).await;

    info!(
        cycles = summary.cycles,
        succeeded = summary.succeeded,
        degraded = summary.degraded,
        points = scan.points().len(),
        range = ?scan.distance_range(),
        "Acquisition finished"
    );

    if args.dump_json {
        println!("{}", serde_json::to_string_pretty(scan.points())?);
    }

    connection
        .shutdown(config.link.close_timeout())
        .await
        .context("Device link did not close cleanly")?;
    Ok(())
}

/// Command-line flags win over file and environment values
fn apply_overrides(config: &mut LumosConfig, args: &Args) -> Result<()> {
    if let Some(medium) = &args.medium {
        config.link.medium = medium.clone();
    }
    if let Some(address) = &args.address {
        config.link.address = address.clone();
    }
    if let Some(number) = args.number {
        config.link.number = number;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.acquisition.interval_ms = interval_ms;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }
    config.expand_env_vars()?;
    config.validate()
}

fn build_transport(config: &LumosConfig) -> Result<Box<dyn Transport>> {
    if config.link.medium.eq_ignore_ascii_case("virtual") {
        let profile = ScanProfile {
            channels: config.acquisition.channels,
            ..ScanProfile::default()
        };
        return Ok(Box::new(VirtualDevice::new(profile)));
    }

    let descriptor = TransportDescriptor {
        medium: config.link.medium.parse()?,
        address: config.link.address.clone(),
        number: config.link.number,
    };
    let options = TransportOptions {
        read_gap: config.link.read_gap(),
    };
    TransportFactory::create(&descriptor, options)
        .with_context(|| format!("Invalid link target {}", descriptor))
}

fn init_logging(config: &LumosConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.logging.level)
        .with_context(|| format!("Invalid log level '{}'", config.logging.level))?;

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}
