use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraSettings {
    pub max_width: u32,
    pub max_height: u32,
    /// Outer retry rounds across every known device.
    pub start_rounds: u32,
    /// Wait after releasing a previous device before opening a new one.
    pub release_delay_ms: u64,
    pub start_poll_timeout_ms: u64,
    pub start_poll_interval_ms: u64,
    /// Extra wait after the device reports running, followed by a re-check.
    pub stability_delay_ms: u64,
    pub round_backoff_ms: u64,
    /// Hard upper bound on waiting for a device to confirm it stopped.
    pub stop_timeout_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            max_width: 640,
            max_height: 480,
            start_rounds: 3,
            release_delay_ms: 1000,
            start_poll_timeout_ms: 3000,
            start_poll_interval_ms: 100,
            stability_delay_ms: 500,
            round_backoff_ms: 2000,
            stop_timeout_ms: 3000,
        }
    }
}

impl CameraSettings {
    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }

    pub fn start_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.start_poll_timeout_ms)
    }

    pub fn start_poll_interval(&self) -> Duration {
        Duration::from_millis(self.start_poll_interval_ms.max(1))
    }

    pub fn stability_delay(&self) -> Duration {
        Duration::from_millis(self.stability_delay_ms)
    }

    pub fn round_backoff(&self) -> Duration {
        Duration::from_millis(self.round_backoff_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionSettings {
    pub timeout_secs: u64,
    pub timeout_tick_ms: u64,
    pub progress_tick_ms: u64,
    pub success_hold_ms: u64,
    pub failure_hold_ms: u64,
    pub cancel_hold_ms: u64,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            timeout_tick_ms: 1000,
            progress_tick_ms: 100,
            success_hold_ms: 5000,
            failure_hold_ms: 3000,
            cancel_hold_ms: 2000,
        }
    }
}

impl RecognitionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn timeout_tick(&self) -> Duration {
        Duration::from_millis(self.timeout_tick_ms.max(1))
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AttendanceSettings {
    pub method_tag: String,
    /// Employee status value meaning "currently employed".
    pub active_status: String,
}

impl Default for AttendanceSettings {
    fn default() -> Self {
        Self {
            method_tag: "face+login-verified".into(),
            active_status: "Working".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnrollmentSettings {
    pub min_samples: usize,
    pub finalize_timeout_secs: u64,
    pub sample_dir: PathBuf,
}

impl Default for EnrollmentSettings {
    fn default() -> Self {
        Self {
            min_samples: 5,
            finalize_timeout_secs: 60,
            sample_dir: PathBuf::from("enrollment"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    pub capture_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            capture_dir: PathBuf::from("captures"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub camera: CameraSettings,
    pub recognition: RecognitionSettings,
    pub attendance: AttendanceSettings,
    pub enrollment: EnrollmentSettings,
    pub storage: StorageSettings,
}

impl Settings {
    /// Resolves relative storage paths against the application data directory.
    pub fn rooted_at(mut self, data_dir: &Path) -> Self {
        if self.enrollment.sample_dir.is_relative() {
            self.enrollment.sample_dir = data_dir.join(&self.enrollment.sample_dir);
        }
        if self.storage.capture_dir.is_relative() {
            self.storage.capture_dir = data_dir.join(&self.storage.capture_dir);
        }
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unreadable settings at {}: {err}",
                    path.display()
                );
                Settings::default()
            })
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn snapshot(&self) -> Settings {
        self.read().clone()
    }

    pub fn camera(&self) -> CameraSettings {
        self.read().camera.clone()
    }

    pub fn recognition(&self) -> RecognitionSettings {
        self.read().recognition.clone()
    }

    pub fn update_camera(&self, settings: CameraSettings) -> Result<()> {
        let mut guard = self.write();
        guard.camera = settings;
        self.persist(&guard)
    }

    pub fn update_recognition(&self, settings: RecognitionSettings) -> Result<()> {
        let mut guard = self.write();
        guard.recognition = settings;
        self.persist(&guard)
    }

    pub fn update_attendance(&self, settings: AttendanceSettings) -> Result<()> {
        let mut guard = self.write();
        guard.attendance = settings;
        self.persist(&guard)
    }

    pub fn update_enrollment(&self, settings: EnrollmentSettings) -> Result<()> {
        let mut guard = self.write();
        guard.enrollment = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: Settings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Settings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Settings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
