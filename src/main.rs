//! # ACU Control
//!
//! Antenna control unit core: firmware link, telemetry and tracking.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use acu_control::config::{Config, LoggingConfig};
use acu_control::ephemeris::{GroundStation, NoaaSun, Sgp4Propagator};
use acu_control::geometry::{ContinuousWrap, TiltTrainTransform};
use acu_control::icd::status::StatusSnapshot;
use acu_control::link::{spawn_link_thread, CommandSender, LinkSettings};
use acu_control::operator::{run_console, OperatorConsole};
use acu_control::telemetry::recorder::run_recorder;
use acu_control::telemetry::{ConnectionHealth, TelemetryRecorder, TelemetryStore};
use acu_control::tracking::{
    run_orchestrator, EngineHandle, Orchestrator, OrchestratorStatus, ScheduleBuilder,
    SunStrategy, TrackingSettings,
};

/// Used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/acu.toml";

/// Operator requests waiting for the orchestrator
const REQUEST_QUEUE_LEN: usize = 32;

/// How long runtime shutdown waits for blocking work (the stdin reader)
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// One line of the telemetry recording
#[derive(Debug, Serialize)]
struct TelemetryLine {
    time: chrono::DateTime<Utc>,
    connection: ConnectionHealth,
    status: StatusSnapshot,
    tracking: OrchestratorStatus,
}

/// Main entry point for the ACU control core
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (defaults if the file is missing)
///    - Set up logging to stdout and, optionally, a daily log file
///    - Start the firmware link on its own `acu-link` thread
///
/// 2. **Running**
///    - Orchestrator tick every 100ms
///    - Telemetry recorder writing JSON lines
///    - Operator console reading JSON commands from stdin
///
/// 3. **Graceful Shutdown** (Ctrl+C)
///    - Stop the orchestrator, which queues a final all-axis stop
///    - Stop the link after it has flushed that command
///
/// # Errors
///
/// Returns error if the configuration is invalid or the runtime, link
/// thread or telemetry directory cannot be set up
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/acu.toml
/// ```
fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let missing = !Path::new(&path).exists();
    let config = if missing {
        Config::default()
    } else {
        Config::load(&path).with_context(|| format!("loading {}", path))?
    };

    let _log_guard = init_logging(&config.logging)?;
    info!("ACU control v{} starting...", env!("CARGO_PKG_VERSION"));
    if missing {
        warn!("Config file {} not found, using defaults", path);
    } else {
        info!("Loaded configuration from {}", path);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    let result = runtime.block_on(run(config));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(config: Config) -> Result<()> {
    let store = TelemetryStore::new(chrono::Duration::milliseconds(
        config.link.connection_timeout_ms as i64,
    ));
    let reader = store.reader();

    let (sender, commands_rx) = CommandSender::channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (stop_link, link_shutdown) = watch::channel(false);
    let (stop_tasks, task_shutdown) = watch::channel(false);

    let link_settings = LinkSettings::from_config(&config.link)?;
    info!(
        "Firmware at {}, polling every {:?}",
        link_settings.firmware, link_settings.poll_interval
    );
    let link_thread = spawn_link_thread(link_settings, store, commands_rx, events_tx, link_shutdown)?;

    let station = GroundStation::from(&config.site);
    let transform = Arc::new(TiltTrainTransform);
    let sun = SunStrategy::new(Arc::new(NoaaSun), transform.clone(), station);
    let orchestrator = Orchestrator::new(
        TrackingSettings::from(&config.tracking),
        sun,
        Arc::new(sender),
        reader.clone(),
    );

    let (status_tx, status_rx) = watch::channel(orchestrator.status(Utc::now()));
    let (engine, requests_rx) = EngineHandle::channel(REQUEST_QUEUE_LEN);
    let engine_task = tokio::spawn(run_orchestrator(
        orchestrator,
        Duration::from_millis(config.tracking.tick_interval_ms),
        events_rx,
        requests_rx,
        status_tx,
        task_shutdown.clone(),
    ));

    let recorder_task = if config.telemetry.enabled {
        let recorder = TelemetryRecorder::new(
            &config.telemetry.log_dir,
            config.telemetry.max_records_per_file,
            config.telemetry.max_files_to_keep,
        )?;
        let reader = reader.clone();
        let sample = move || {
            let now = Utc::now();
            TelemetryLine {
                time: now,
                connection: reader.health_at(now),
                status: (*reader.snapshot()).clone(),
                tracking: status_rx.borrow().clone(),
            }
        };
        Some(tokio::spawn(run_recorder(
            recorder,
            Duration::from_millis(config.telemetry.log_interval_ms),
            sample,
            task_shutdown.clone(),
        )))
    } else {
        info!("Telemetry recording disabled");
        None
    };

    let builder = ScheduleBuilder::new(
        Arc::new(Sgp4Propagator),
        transform,
        Arc::new(ContinuousWrap::default()),
        station,
        config.tracking.tilt_offset_deg,
        config.schedule.min_elevation_deg,
    );
    let console = OperatorConsole::new(engine, builder, config.schedule.horizon_hours);
    let console_task = tokio::spawn(run_console(
        console,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        task_shutdown,
    ));

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    stop_tasks.send_replace(true);
    if let Err(e) = engine_task.await {
        warn!("Orchestrator task failed: {}", e);
    }
    if let Some(task) = recorder_task {
        match task.await {
            Ok(written) => info!("Telemetry records written: {}", written),
            Err(e) => warn!("Recorder task failed: {}", e),
        }
    }
    if console_task.is_finished() {
        if let Ok(Err(e)) = console_task.await {
            warn!("Operator console failed: {}", e);
        }
    }

    // the final stop is queued; the link flushes it before closing
    stop_link.send_replace(true);
    let stats = tokio::task::spawn_blocking(move || link_thread.join())
        .await?
        .map_err(|_| anyhow::anyhow!("link thread panicked"))?;
    info!(
        "Link closed: {} polls, {} commands, {} status frames, {} decode errors",
        stats.polls_sent, stats.commands_sent, stats.status_frames, stats.decode_errors
    );

    Ok(())
}

/// Stdout logging, plus a daily-rolling file when `dir` is set
///
/// `RUST_LOG` overrides the configured level.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };
    let stdout_layer = fmt::layer().with_filter(filter());

    let Some(dir) = &config.dir else {
        tracing_subscriber::registry().with(stdout_layer).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir).with_context(|| format!("creating log dir {}", dir))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
        dir,
        "acu-control.log",
    ));
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(filter());

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();
    Ok(Some(guard))
}
