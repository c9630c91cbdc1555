use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use image::{Rgb, RgbImage};
use log::{debug, error};

use super::{
    device::{CameraDevice, Resolution},
    source::{DeviceHandle, FrameCallback, FrameEvent, FrameSource},
};

const DEFAULT_FPS: u32 = 15;

/// Test-pattern frame source. Each handle runs a named capture thread that
/// renders a moving gradient at the requested resolution.
pub struct SyntheticSource {
    devices: Vec<CameraDevice>,
    fps: u32,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(vec![CameraDevice::new(
            "synthetic:0",
            "Synthetic Camera 0",
            vec![
                Resolution::new(1280, 720),
                Resolution::new(640, 480),
                Resolution::new(320, 240),
            ],
        )])
    }
}

impl SyntheticSource {
    pub fn new(devices: Vec<CameraDevice>) -> Self {
        Self {
            devices,
            fps: DEFAULT_FPS,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }
}

impl FrameSource for SyntheticSource {
    fn enumerate(&self) -> Result<Vec<CameraDevice>> {
        Ok(self.devices.clone())
    }

    fn open(&self, device: &CameraDevice, resolution: Option<Resolution>) -> Result<Arc<dyn DeviceHandle>> {
        let known = self
            .devices
            .iter()
            .any(|candidate| candidate.moniker == device.moniker);
        if !known {
            bail!("unknown synthetic device '{}'", device.moniker);
        }

        let resolution = resolution.unwrap_or(Resolution::new(320, 240));
        Ok(Arc::new(SyntheticHandle {
            name: device.name.clone(),
            resolution,
            frame_interval: Duration::from_millis(1000 / u64::from(self.fps)),
            callback: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }))
    }
}

struct SyntheticHandle {
    name: String,
    resolution: Resolution,
    frame_interval: Duration,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceHandle for SyntheticHandle {
    fn set_frame_callback(&self, callback: Option<FrameCallback>) {
        let mut guard = match self.callback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = callback;
    }

    fn start(&self) -> Result<()> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| anyhow!("synthetic worker lock poisoned"))?;
        if worker.is_some() {
            bail!("device '{}' already started", self.name);
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        let callback = Arc::clone(&self.callback);
        let running = Arc::clone(&self.running);
        let stop_requested = Arc::clone(&self.stop_requested);
        let frames = Arc::clone(&self.frames);
        let resolution = self.resolution;
        let interval = self.frame_interval;

        let handle = thread::Builder::new()
            .name(format!("synthetic-capture-{}", self.name))
            .spawn(move || {
                running.store(true, Ordering::SeqCst);
                while !stop_requested.load(Ordering::SeqCst) {
                    let sequence = frames.fetch_add(1, Ordering::Relaxed);
                    let frame = render_pattern(resolution, sequence);

                    let current = match callback.lock() {
                        Ok(guard) => guard.clone(),
                        Err(poisoned) => poisoned.into_inner().clone(),
                    };
                    if let Some(deliver) = current {
                        deliver(FrameEvent::Frame(&frame));
                    }

                    thread::sleep(interval);
                }
                running.store(false, Ordering::SeqCst);
                debug!("synthetic capture thread exiting");
            })
            .context("failed to spawn synthetic capture thread")?;

        *worker = Some(handle);
        Ok(())
    }

    fn signal_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn wait_for_stop(&self) {
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("synthetic capture thread for '{}' panicked", self.name);
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn render_pattern(resolution: Resolution, sequence: u64) -> RgbImage {
    let shift = (sequence % 256) as u32;
    RgbImage::from_fn(resolution.width, resolution.height, |x, y| {
        let r = ((x + shift) % 256) as u8;
        let g = ((y + shift) % 256) as u8;
        let b = ((x ^ y) % 256) as u8;
        Rgb([r, g, b])
    })
}
