pub mod attendance;
pub mod camera;
pub mod diagnostics;
pub mod enrollment;
pub mod error;
pub mod ports;
pub mod recognition;
pub mod settings;
pub mod station;
mod utils;

#[cfg(test)]
mod test_support;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::info;

use camera::{CameraManager, SyntheticSource};
use settings::{Settings, SettingsStore};

pub use station::{AttendanceStation, Collaborators, StationStatus};

const DATA_DIR_ENV: &str = "ATTENDCAM_DATA_DIR";
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Loads settings and runs the camera self-test against the synthetic source.
pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("attendcam starting up...");

    let data_dir = std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("attendcam-data"));
    let store = SettingsStore::new(data_dir.join("settings.json"))?;
    let settings = store.snapshot().rooted_at(&data_dir);

    let runtime = tokio::runtime::Runtime::new().context("failed to build tokio runtime")?;
    let outcome = runtime.block_on(self_test(settings));
    // A device that never confirmed its stop still has a blocked waiter.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    outcome
}

async fn self_test(settings: Settings) -> Result<()> {
    let camera = CameraManager::new(Arc::new(SyntheticSource::default()), settings.camera.clone());

    let devices = camera.list_devices()?;
    info!("found {} camera(s)", devices.len());

    let session = camera.start(0).await?;
    let mut frames = session.subscribe();
    tokio::time::timeout(FIRST_FRAME_TIMEOUT, frames.wait_for(|frame| frame.is_some()))
        .await
        .context("camera produced no frame")?
        .context("frame feed closed")?;

    let path = settings.storage.capture_dir.join("self_test.jpg");
    session.save_last_frame(&path).await?;
    info!("saved test frame to {}", path.display());

    let report = diagnostics::collect_report(devices, Some(&session), None, None);
    println!("{report}");

    if !camera.stop().await {
        log::warn!("camera did not confirm stop");
    }
    Ok(())
}
