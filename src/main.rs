//! # Field Tracker
//!
//! Host harness for the tracker telemetry pipeline.
//!
//! Runs a gateway collector and a configurable number of simulated trackers
//! connected through the in-process loopback radio.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (first CLI argument, default `config/default.toml`)
//!    - Set up logging, optionally with a daily-rolling file
//!    - Open each tracker's ring log, reformatting on a layout mismatch
//!
//! 2. **Run**
//!    - Each tracker captures on its timer and on motion, and drains its
//!      backlog whenever the collector subscribes
//!    - The collector forwards decoded records to the serial uplink, or logs
//!      them when the uplink is disabled
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C stops the trackers, which log their ring log state
//!
//! # Examples
//!
//! ```bash
//! RUST_LOG=field_tracker=debug cargo run --release -- config/default.toml
//! ```

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use field_tracker::capture::{
    run_timer, wake_channel, watch_motion, CaptureScheduler, SimulatedAccelerometer,
    SimulatedSensors,
};
use field_tracker::config::{Config, LoggingConfig};
use field_tracker::error::StorageError;
use field_tracker::serial::GatewayUplink;
use field_tracker::storage::{FileFlash, FlashDevice, RamFlash, RingLog};
use field_tracker::transport::{self, run_processor, Collector, LogSink, LoopbackAir, PeerAddress};

/// Configuration used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Wake queue depth per tracker
const WAKE_QUEUE_CAPACITY: usize = 8;

/// Address of simulated tracker `index`
fn tracker_address(index: usize) -> PeerAddress {
    PeerAddress([0xC0, 0xFF, 0xEE, 0x00, 0x00, index as u8])
}

fn env_filter() -> EnvFilter {
    EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

/// Install the console subscriber, plus a rolling file layer when configured
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "field-tracker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter()).init();
            None
        }
    }
}

/// Open a ring log, reformatting the region if it holds another layout
fn open_store<F, M>(mut make_flash: M) -> Result<RingLog<F>>
where
    F: FlashDevice,
    M: FnMut() -> std::result::Result<F, StorageError>,
{
    match RingLog::open(make_flash()?) {
        Err(e @ StorageError::LayoutMismatch { .. }) => {
            warn!("{}; reformatting", e);
            Ok(RingLog::format(make_flash()?)?)
        }
        other => Ok(other?),
    }
}

/// Start one simulated tracker and its wake sources
fn spawn_tracker<F: FlashDevice + 'static>(
    config: &Config,
    index: usize,
    log: RingLog<F>,
    air: &LoopbackAir,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<()>> {
    let peer = tracker_address(index);
    let (wake, wakes) = wake_channel(WAKE_QUEUE_CAPACITY);
    let link = air.add_tracker(peer, &format!("tracker-{}", index), wake.clone());

    tokio::spawn(run_timer(config.capture_interval(), wake.clone()));
    if config.motion.enabled {
        tokio::spawn(watch_motion(
            SimulatedAccelerometer::new(config.simulation.jolt_every),
            config.motion_threshold(),
            config.motion_sample_interval(),
            wake,
        ));
    }

    let mut scheduler = CaptureScheduler::new(
        log,
        SimulatedSensors::new(index as u8),
        link,
        wakes,
        config.capture_settings(),
    );

    tokio::spawn(async move {
        tokio::select! {
            result = scheduler.run() => result?,
            _ = shutdown.changed() => {}
        }
        let meta = scheduler.log().metadata();
        info!(
            "Tracker {} ({}) stopped: {} records held, {} sent, {} wraps",
            index,
            peer,
            meta.size,
            meta.read_size,
            meta.wrap_around
        );
        Ok::<(), anyhow::Error>(())
    })
}

/// Main entry point for the field tracker harness
///
/// # Errors
///
/// Returns error if:
/// - The configuration cannot be loaded
/// - A tracker's flash region cannot be opened
/// - The uplink is enabled and its port cannot be opened
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;
    let _log_guard = init_logging(&config.logging);

    info!("Field Tracker v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    let (air, events) = LoopbackAir::new();
    let (producer, consumer) = transport::channel(config.transport.queue_capacity);
    let mut collector = Collector::new(air.central(), config.transport.max_connections, producer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let storage = &config.storage;
    let mut trackers = Vec::with_capacity(config.simulation.trackers);
    for index in 0..config.simulation.trackers {
        if config.simulation.assign_device_ids {
            let device_id = usize::from(config.device.device_id) + index;
            collector.queue_device_id(tracker_address(index), device_id as u8);
        }

        let handle = if storage.image_path.is_empty() {
            let log = open_store(|| {
                Ok(RamFlash::new(
                    storage.region_size,
                    storage.page_size,
                    storage.write_block_size,
                ))
            })?;
            spawn_tracker(&config, index, log, &air, shutdown_rx.clone())
        } else {
            let path = if config.simulation.trackers == 1 {
                storage.image_path.clone()
            } else {
                format!("{}.{}", storage.image_path, index)
            };
            let log = open_store(|| {
                FileFlash::open(
                    &path,
                    storage.region_size,
                    storage.page_size,
                    storage.write_block_size,
                )
            })?;
            info!("Tracker {} ring log at {}", index, path);
            spawn_tracker(&config, index, log, &air, shutdown_rx.clone())
        };
        trackers.push(handle);
    }

    let processor = if config.uplink.enabled {
        let uplink = GatewayUplink::open_with_paths(
            &[config.uplink.port.as_str()],
            config.uplink.baud_rate,
            &config.uplink.gateway_id,
        )?;
        tokio::spawn(run_processor(consumer, uplink))
    } else {
        info!("Uplink disabled; logging records");
        tokio::spawn(run_processor(consumer, LogSink::new()))
    };
    let radio = tokio::spawn(collector.run(events));

    info!(
        "Running {} trackers (capture every {}s)",
        config.simulation.trackers, config.capture.interval_s
    );
    info!("Press Ctrl+C to exit");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let _ = shutdown_tx.send(true);
    for tracker in trackers {
        tracker.await??;
    }
    radio.abort();
    processor.abort();

    info!("Field Tracker stopped");
    Ok(())
}
