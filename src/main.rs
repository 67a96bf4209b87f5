//! Drishti-IO - acquisition daemon
//!
//! Connects the configured LIDAR, runs joint capture at the configured
//! interval and prints every capture record as one JSON line on stdout.
//! Logs go to stderr.

use drishti_io::capture::{detect_hardware, CaptureOrchestrator};
use drishti_io::{AcquisitionConfig, Error, Result};
use std::env;
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "/etc/drishti.toml";

/// Pick the config file
///
/// `--config <path>`, `--config=<path>` and `-c <path>` win over a bare
/// path argument, which wins over `DRISHTI_CONFIG`.
fn config_path<I>(args: I, from_env: Option<String>) -> PathBuf
where
    I: IntoIterator<Item = String>,
{
    let mut positional = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            return PathBuf::from(path);
        }
        if arg == "--config" || arg == "-c" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        } else if !arg.starts_with('-') && positional.is_none() {
            positional = Some(arg);
        }
    }
    positional
        .or(from_env)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from)
}

fn main() -> Result<()> {
    let config_path = config_path(env::args().skip(1), env::var("DRISHTI_CONFIG").ok());
    let config = AcquisitionConfig::load(&config_path)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("Drishti-IO v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", config_path.display());

    let hardware = detect_hardware();
    for camera in &hardware.cameras {
        log::info!("Camera candidate: {} ({})", camera.device, camera.kind);
    }
    for lidar in &hardware.lidars {
        log::info!(
            "LIDAR candidate: {} ({}) {}",
            lidar.transport,
            lidar.kind.map_or("unknown", |k| k.name()),
            lidar.description.as_deref().unwrap_or_default()
        );
    }

    let mut orchestrator = CaptureOrchestrator::new(config.capture_options());
    orchestrator.setup_lidar(config.session_config()?)?;
    orchestrator.set_monitor(|e| log::error!("{}", e));

    let stop = orchestrator.run_continuous(config.interval(), config.duration(), |record| {
        match record.to_json() {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("Failed to serialize record: {}", e),
        }
    })?;

    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        stop.stop();
    })
    .map_err(|e| Error::InvalidParameter(format!("Error setting Ctrl-C handler: {}", e)))?;

    log::info!("Drishti-IO running. Press Ctrl-C to stop.");
    orchestrator.wait()?;

    if let Some(stats) = orchestrator.lidar_statistics() {
        log::info!(
            "LIDAR: {} samples, {} decode faults, {} transport faults, {} filtered",
            stats.frames_succeeded,
            stats.decode_faults,
            stats.transport_faults,
            stats.samples_filtered
        );
    }
    orchestrator.cleanup();
    log::info!("Drishti-IO stopped");
    Ok(())
}
