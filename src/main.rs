//! robolog - Main Entry Point
//!
//! Runs one capture session until Ctrl+C (or `--duration-s`) and performs the
//! final rotation on the way out.
//!
//! # Usage
//!
//! ```bash
//! robolog --config robolog.toml
//! robolog --simulate --duration-s 30 --log-dir /tmp/robolog-logs
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use robolog_rs::config::{self, LoggerConfig};
use robolog_rs::{CaptureSession, Clock, Collaborators, SystemClock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "robolog")]
#[command(about = "Real-time telemetry logger for robots", long_about = None)]
struct Args {
    /// Session configuration (TOML). Defaults to the platform config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write the logger's own diagnostics to daily files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_s: Option<f64>,

    /// Feed the session from simulated sensors, producers and cameras
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (file_layer, _guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "robolog.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,robolog_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!("Starting robolog {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let collaborators = if args.simulate {
        simulated_collaborators(&config, Arc::clone(&clock))?
    } else {
        Collaborators::new(Arc::clone(&clock))
    };

    let session = CaptureSession::configure(config, collaborators)?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc::set_handler({
        let running = Arc::clone(&running);
        move || {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
            running.store(false, Ordering::SeqCst);
        }
    })?;

    if let Some(duration) = args.duration_s {
        let running = Arc::clone(&running);
        let limit = Duration::try_from_secs_f64(duration.max(0.0))
            .context("--duration-s is out of range")?;
        std::thread::Builder::new()
            .name("duration-limit".to_string())
            .spawn(move || {
                std::thread::sleep(limit);
                tracing::info!("Duration limit of {:.1}s reached", duration);
                running.store(false, Ordering::SeqCst);
            })?;
    }

    session.start()?;
    session.run(&running);
    session.stop()?;

    let stats = session.stats();
    tracing::info!(
        "Session finished: {} ticks, {} overruns, {} rotations ({} failed), {} dropped samples",
        stats.ticks,
        stats.overruns,
        stats.rotations,
        stats.failed_rotations,
        stats.dropped_samples
    );
    Ok(())
}

fn load_config(args: &Args) -> Result<LoggerConfig> {
    let path = args.config.clone().or_else(config::default_config_path);
    match path {
        Some(path) if path.is_file() => {
            tracing::info!("Loading configuration from {}", path.display());
            LoggerConfig::load(&path).with_context(|| format!("Invalid configuration {}", path.display()))
        }
        Some(path) if args.config.is_some() => {
            anyhow::bail!("Configuration file {} does not exist", path.display())
        }
        _ if args.simulate => {
            tracing::warn!("No configuration file found, simulating with defaults");
            Ok(LoggerConfig::default())
        }
        _ => anyhow::bail!("No configuration file given and none found in the platform config directory"),
    }
}

#[cfg(feature = "mock-sources")]
fn simulated_collaborators(config: &LoggerConfig, clock: Arc<dyn Clock>) -> Result<Collaborators> {
    use robolog_rs::sources::mock::{
        InMemoryExogenousTransport, InMemoryLogReceiver, InMemoryProducerTransport, SignalPattern,
        SimulatedSource, SyntheticFrameSource,
    };
    use robolog_rs::channels::names::{sensor_name, IMUS_NAME, JOINT_STATE_POSITIONS};
    use robolog_rs::sources::{ExogenousData, ExogenousKind, TextLogEntry};
    use std::collections::BTreeMap;

    let joints = SimulatedSource::new(
        JOINT_STATE_POSITIONS,
        vec![
            SignalPattern::Sine {
                frequency: 0.5,
                amplitude: 1.0,
                offset: 0.0,
            },
            SignalPattern::Sawtooth {
                period: 2.0,
                amplitude: 1.5,
            },
            SignalPattern::Constant(0.25),
        ],
        Arc::clone(&clock),
    )
    .with_labels(["neck_pitch", "neck_roll", "neck_yaw"]);
    let battery = SimulatedSource::new(
        "battery::status",
        vec![SignalPattern::Counter {
            step: 0.01,
            min: 0.0,
            max: 100.0,
        }],
        Arc::clone(&clock),
    )
    .with_dropout(10);
    // Orientation, accelerometer and gyro of one IMU
    let imu = SimulatedSource::new(
        sensor_name(IMUS_NAME, "waist_imu"),
        vec![
            SignalPattern::Sine {
                frequency: 0.2,
                amplitude: 0.1,
                offset: 0.0,
            },
            SignalPattern::Constant(0.0),
            SignalPattern::Constant(0.0),
            SignalPattern::Constant(0.0),
            SignalPattern::Constant(0.0),
            SignalPattern::Constant(9.81),
            SignalPattern::Sine {
                frequency: 0.2,
                amplitude: 0.02,
                offset: 0.0,
            },
            SignalPattern::Constant(0.0),
            SignalPattern::Constant(0.0),
        ],
        Arc::clone(&clock),
    );

    let producers = Arc::new(InMemoryProducerTransport::new());
    let producer = format!("{}robolog-sim/{}", config.text_logging_port_prefix, std::process::id());
    producers.add_producer(&producer);
    let (logs, receiver) = InMemoryLogReceiver::channel();
    logs.send(TextLogEntry::new(
        "yarp",
        config.text_logging_port_prefix.trim_matches('/'),
        "robolog-sim",
        &std::process::id().to_string(),
        "simulation started",
    ));

    let exogenous = Arc::new(InMemoryExogenousTransport::new());
    for signal in &config.exogenous {
        exogenous.set_online(&signal.remote, true);
        match signal.kind {
            ExogenousKind::VectorsCollection => {
                exogenous.set_schema(
                    &signal.remote,
                    BTreeMap::from([("force".to_string(), vec!["fx".into(), "fy".into(), "fz".into()])]),
                );
                exogenous.set_data(
                    &signal.remote,
                    ExogenousData::Collection(BTreeMap::from([("force".to_string(), vec![0.0, 0.0, 9.81])])),
                );
            }
            ExogenousKind::Vector => exogenous.set_data(&signal.remote, ExogenousData::Vector(vec![1.0, 2.0])),
        }
    }

    let mut collaborators = Collaborators::new(clock)
        .with_source(Box::new(joints))
        .with_source(Box::new(battery))
        .with_source(Box::new(imu))
        .with_text_logs(producers, Box::new(receiver))
        .with_exogenous(exogenous);
    if let Some(camera) = config.cameras.first() {
        collaborators = collaborators.with_frames(Arc::new(SyntheticFrameSource::new(camera.width, camera.height)));
    }
    Ok(collaborators)
}

#[cfg(not(feature = "mock-sources"))]
fn simulated_collaborators(_config: &LoggerConfig, _clock: Arc<dyn Clock>) -> Result<Collaborators> {
    anyhow::bail!("--simulate requires the `mock-sources` feature")
}
