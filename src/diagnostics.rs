use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::{
    attendance::SystemReadiness,
    camera::{CameraDevice, CaptureSession, CaptureStats, Resolution},
    recognition::RecognitionStatus,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraReport {
    pub device: String,
    pub resolution: Option<Resolution>,
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub stats: CaptureStats,
}

impl CameraReport {
    pub fn of(session: &CaptureSession) -> Self {
        Self {
            device: session.device().name.clone(),
            resolution: session.resolution(),
            running: session.is_running(),
            started_at: session.started_at(),
            stats: session.stats(),
        }
    }
}

/// Host, camera and engine state for support requests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemReport {
    pub generated_at: DateTime<Utc>,
    pub os_name: String,
    pub os_version: String,
    pub host_name: String,
    pub process_memory_mb: f64,
    pub devices: Vec<CameraDevice>,
    pub camera: Option<CameraReport>,
    pub engine: Option<SystemReadiness>,
    pub recognition: Option<RecognitionStatus>,
}

pub fn collect_report(
    devices: Vec<CameraDevice>,
    camera: Option<&CaptureSession>,
    engine: Option<SystemReadiness>,
    recognition: Option<RecognitionStatus>,
) -> SystemReport {
    SystemReport {
        generated_at: Utc::now(),
        os_name: System::name().unwrap_or_else(|| "unknown".into()),
        os_version: System::long_os_version()
            .or_else(System::os_version)
            .unwrap_or_else(|| "unknown".into()),
        host_name: System::host_name().unwrap_or_else(|| "unknown".into()),
        process_memory_mb: process_memory_mb(),
        devices,
        camera: camera.map(CameraReport::of),
        engine,
        recognition,
    }
}

fn process_memory_mb() -> f64 {
    let mut system = System::new();
    let pid = Pid::from_u32(std::process::id());
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system
        .process(pid)
        .map(|process| process.memory() as f64 / 1024.0 / 1024.0)
        .unwrap_or(0.0)
}

impl fmt::Display for SystemReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== SYSTEM REPORT ({}) ===", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "OS: {} {}", self.os_name, self.os_version)?;
        writeln!(f, "Host: {}", self.host_name)?;
        writeln!(f, "Process memory: {:.1} MB", self.process_memory_mb)?;

        writeln!(f, "Cameras: {}", self.devices.len())?;
        for (index, device) in self.devices.iter().enumerate() {
            let modes: Vec<String> = device.resolutions.iter().map(|res| res.to_string()).collect();
            writeln!(f, "  [{index}] {} ({})", device.name, modes.join(", "))?;
        }

        match &self.camera {
            Some(camera) => {
                let resolution = camera
                    .resolution
                    .map(|res| res.to_string())
                    .unwrap_or_else(|| "default".into());
                writeln!(
                    f,
                    "Active camera: {} at {} ({}), {} frames, {} errors",
                    camera.device,
                    resolution,
                    if camera.running { "running" } else { "stopped" },
                    camera.stats.frames_received,
                    camera.stats.frame_errors
                )?;
            }
            None => writeln!(f, "Active camera: none")?,
        }

        match &self.engine {
            Some(engine) if engine.ready => writeln!(f, "Recognition engine: ready ({})", engine.message)?,
            Some(engine) => writeln!(f, "Recognition engine: NOT READY ({})", engine.reason())?,
            None => writeln!(f, "Recognition engine: not checked")?,
        }

        if let Some(status) = self.recognition {
            writeln!(f, "Recognition: {status:?}")?;
        }
        Ok(())
    }
}
