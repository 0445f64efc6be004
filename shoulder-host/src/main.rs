// ShoulderLink Host - polls a posture tracker over serial
// Copyright (c) The ShoulderLink developers
//
// Licensed under the MIT license.
// See LICENSE file for details.

//! # ShoulderLink Host
//!
//! Connects to a shoulder tracker, keeps the connection alive and logs every
//! telemetry frame.
//!
//! ## Usage
//!
//! ```bash
//! # Probe the platform's default ports
//! shoulder-host
//!
//! # Explicit port, dynamic mode, stop after a minute
//! shoulder-host --port /dev/ttyUSB0 --mode dynamic --duration 60
//!
//! # No hardware: talk to the in-process simulator
//! shoulder-host --simulate --log-level debug
//! ```

mod sink;

use clap::{Parser, ValueEnum};
use shoulder_link::aggregator::SystemClock;
use shoulder_link::config::Config;
use shoulder_link::connection::ConnectionManager;
use shoulder_link::device::{SimulatedConnector, SimulatedDevice};
use shoulder_link::link::LinkProtocol;
use shoulder_link::poller::{PollContext, Poller};
use shoulder_link::protocol::Mode;
use shoulder_link::transport::{Connector, Endpoint, SerialConnector};
use sink::TracingSink;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Static,
    Dynamic,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Static => Mode::Static,
            ModeArg::Dynamic => Mode::Dynamic,
        }
    }
}

/// ShoulderLink host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port to probe (repeatable; replaces the default candidates)
    #[arg(short, long)]
    port: Vec<String>,

    /// Use the built-in simulated tracker instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Monitoring mode selected on connection
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Stop after this many seconds (runs until killed otherwise)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ShoulderLink host v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    if let Some(mode) = args.mode {
        config.poll.initial_mode = mode.into();
    }
    if !args.port.is_empty() {
        config.candidates = Some(args.port.iter().cloned().map(Endpoint::Path).collect());
    }

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    if args.simulate {
        info!("Using the simulated tracker");
        let device = SimulatedDevice::new(&config.threshold, SystemClock::new());
        let connector =
            SimulatedConnector::new().attach(Endpoint::Path("simulated".to_string()), device);
        run(connector, config, deadline);
    } else {
        let candidates = config.candidates();
        info!(
            "Probing {}",
            candidates
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let connector = SerialConnector::new(
            candidates,
            config.link.baud_rate,
            config.link.read_timeout(),
        );
        run(connector, config, deadline);
    }

    ExitCode::SUCCESS
}

/// Drive the poller until `deadline`
fn run<C: Connector>(connector: C, config: Config, deadline: Option<Instant>) {
    let manager = ConnectionManager::new(connector, LinkProtocol::new(config.link.clone()));
    let mut ctx = PollContext::new(&config.poll);
    let mut poller = Poller::new(manager, config.poll, Instant::now());
    let mut sink = TracingSink::default();

    loop {
        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            break;
        }
        poller.tick(now, &mut ctx, &mut sink);

        if let Some(next) = poller.next_deadline() {
            let wait = next.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }

    poller.shutdown(&mut ctx);
    info!(
        "Accepted {} frames, {} with feedback",
        sink.frames(),
        sink.feedback_frames()
    );
    println!("{}", ctx.metrics.report());
}
