//! # thermolink
//!
//! Finds the multimeter on the serial ports, polls the thermocouple voltage
//! and prints compensated temperatures until Ctrl-C.
//!
//! ## Usage
//! ```bash
//! thermolink                                  # scan all ports, console output
//! thermolink --port /dev/ttyUSB0 --cold-junction 23.5
//! thermolink --json --forward-port COM9 -v    # JSON lines plus forward link
//! thermolink --list-ports
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use thermolink_core::config::{ForwardSettings, MonitorConfig, DEFAULT_FORWARD_BAUD_RATE};
use thermolink_core::protocol::list_ports;
use thermolink_core::shutdown::{StopSignal, SystemSleeper};
use thermolink_core::telemetry::{ConsoleSink, ForwardSink, JsonLinesSink, Sink, TelemetryLoop};
use tracing::{info, warn};

/// K-type thermocouple monitor for serial bench multimeters
#[derive(Parser, Debug)]
#[command(name = "thermolink", version, about)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Candidate port (repeatable); default scans every serial port
    #[arg(short, long = "port", value_name = "NAME")]
    ports: Vec<String>,

    /// Cold-junction temperature in °C
    #[arg(long, value_name = "CELSIUS")]
    cold_junction: Option<f64>,

    /// Forward accepted temperatures to this serial port
    #[arg(long, value_name = "NAME")]
    forward_port: Option<String>,

    /// Forward link baud rate
    #[arg(long, value_name = "BAUD")]
    forward_baud: Option<u32>,

    /// Read back and log the forward receiver's echo
    #[arg(long)]
    echo: bool,

    /// Print JSON lines instead of the console format
    #[arg(long)]
    json: bool,

    /// Fixed seed for the delta limiter
    #[arg(long)]
    seed: Option<u64>,

    /// Publish converted values without delta limiting
    #[arg(long)]
    no_limiter: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}

/// Layer command-line overrides on top of the loaded configuration
fn apply_overrides(args: &Args, config: &mut MonitorConfig) {
    if !args.ports.is_empty() {
        config.scan.ports = Some(args.ports.clone());
    }
    if let Some(cold_junction) = args.cold_junction {
        config.calibration.cold_junction_c = cold_junction;
    }
    if let Some(seed) = args.seed {
        config.calibration.limiter.seed = Some(seed);
    }
    if args.no_limiter {
        config.calibration.limiter.enabled = false;
    }
    if let Some(port) = &args.forward_port {
        let (baud_rate, read_echo) = config
            .forward
            .as_ref()
            .map_or((DEFAULT_FORWARD_BAUD_RATE, false), |f| (f.baud_rate, f.read_echo));
        config.forward = Some(ForwardSettings {
            port: port.clone(),
            baud_rate,
            read_echo,
        });
    }
    if let Some(forward) = config.forward.as_mut() {
        if let Some(baud) = args.forward_baud {
            forward.baud_rate = baud;
        }
        if args.echo {
            forward.read_echo = true;
        }
    }
}

fn load_config(args: &Args) -> Result<MonitorConfig> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    apply_overrides(args, &mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_sinks(args: &Args, config: &MonitorConfig) -> Vec<Box<dyn Sink>> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
    if args.json {
        sinks.push(Box::new(JsonLinesSink::new(io::stdout())));
    } else {
        sinks.push(Box::new(ConsoleSink::new(io::stdout())));
    }

    if let Some(forward) = &config.forward {
        match ForwardSink::open(forward) {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => warn!("forward link {} unavailable, continuing without it: {e}", forward.port),
        }
    }
    sinks
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {vid:04x}:{pid:04x}  {}",
                port.name,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.name),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list_ports {
        print_ports();
        return Ok(());
    }

    let config = load_config(&args)?;
    if args.dump_config {
        let json = config
            .to_json_pretty()
            .context("encoding configuration")?;
        println!("{json}");
        return Ok(());
    }

    let sinks = build_sinks(&args, &config);
    let mut telemetry = TelemetryLoop::from_config(&config, sinks, Arc::new(SystemSleeper))
        .context("starting sink workers")?;

    let stop = StopSignal::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        ctrl_c_stop.trigger();
    });

    info!(
        "thermolink {} (cold junction {:.1} °C)",
        thermolink_core::VERSION,
        config.calibration.cold_junction_c
    );
    tokio::task::spawn_blocking(move || telemetry.run(&stop))
        .await
        .context("acquisition task failed")?;
    Ok(())
}
