use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::{
    device::{CameraDevice, Resolution},
    source::{DeviceHandle, FrameCallback, FrameEvent},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// A frame copied out of the backend's buffer.
#[derive(Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    pub frames_received: u64,
    pub frame_errors: u64,
}

#[derive(Default)]
struct SlotState {
    running: bool,
    /// Set on stop; deliveries already in flight are dropped.
    closed: bool,
    last_frame: Option<Arc<Frame>>,
    stats: CaptureStats,
}

/// Single-slot, last-write-wins frame buffer shared with the capture thread.
struct FrameSlot {
    state: Mutex<SlotState>,
    sequence: AtomicU64,
    latest_tx: watch::Sender<Option<Arc<Frame>>>,
}

impl FrameSlot {
    fn new() -> Self {
        let (latest_tx, _) = watch::channel(None);
        Self {
            state: Mutex::new(SlotState::default()),
            sequence: AtomicU64::new(0),
            latest_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn deliver(&self, image: &RgbImage) {
        // Copy before taking the lock so the backend buffer is free immediately
        // and the lock is held only for the pointer swap.
        let frame = Arc::new(Frame {
            image: image.clone(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            captured_at: Utc::now(),
        });

        let previous = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.stats.frames_received += 1;
            state.last_frame.replace(Arc::clone(&frame))
        };
        drop(previous);

        self.latest_tx.send_replace(Some(frame));
    }

    fn close(&self) {
        let released = {
            let mut state = self.lock();
            state.closed = true;
            state.running = false;
            state.last_frame.take()
        };
        drop(released);
        self.latest_tx.send_replace(None);
    }

    fn record_error(&self, message: &str) {
        let errors = {
            let mut state = self.lock();
            state.stats.frame_errors += 1;
            state.stats.frame_errors
        };
        log_warn!("dropping frame after capture error ({errors} so far): {message}");
    }
}

/// One running capture device and its latest frame.
pub struct CaptureSession {
    id: Uuid,
    device: CameraDevice,
    resolution: Option<Resolution>,
    handle: Arc<dyn DeviceHandle>,
    slot: Arc<FrameSlot>,
    started_at: DateTime<Utc>,
    stopped: AtomicBool,
    stop_timeout: Duration,
}

impl CaptureSession {
    pub(crate) fn new(
        device: CameraDevice,
        resolution: Option<Resolution>,
        handle: Arc<dyn DeviceHandle>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device,
            resolution,
            handle,
            slot: Arc::new(FrameSlot::new()),
            started_at: Utc::now(),
            stopped: AtomicBool::new(false),
            stop_timeout,
        }
    }

    pub(crate) fn frame_callback(&self) -> FrameCallback {
        let slot = Arc::clone(&self.slot);
        Arc::new(move |event: FrameEvent<'_>| match event {
            FrameEvent::Frame(image) => slot.deliver(image),
            FrameEvent::Error(message) => slot.record_error(&message),
        })
    }

    pub(crate) fn handle(&self) -> &Arc<dyn DeviceHandle> {
        &self.handle
    }

    pub(crate) fn mark_running(&self) {
        self.slot.lock().running = true;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device(&self) -> &CameraDevice {
        &self.device
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.slot.lock().running && self.handle.is_running()
    }

    pub fn last_frame(&self) -> Option<Arc<Frame>> {
        self.slot.lock().last_frame.clone()
    }

    /// Latest-value-wins feed for display or recognition consumers.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.slot.latest_tx.subscribe()
    }

    pub fn stats(&self) -> CaptureStats {
        self.slot.lock().stats
    }

    /// Unregisters the frame callback and tells the device to stop without
    /// waiting for it. Returns `false` if the session was already stopped.
    pub fn signal_stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.handle.set_frame_callback(None);
        self.handle.signal_stop();
        self.slot.close();
        true
    }

    /// Signals the device and waits up to the stop timeout for it to exit.
    /// Returns `false` when the wait timed out. Calling this on a stopped
    /// session is a no-op.
    pub async fn stop(&self) -> bool {
        if !self.signal_stop() {
            return true;
        }

        let waited = if self.handle.is_running() {
            let handle = Arc::clone(&self.handle);
            tokio::time::timeout(
                self.stop_timeout,
                tokio::task::spawn_blocking(move || handle.wait_for_stop()),
            )
            .await
        } else {
            // Never started, or already halted on signal.
            Ok(Ok(()))
        };

        let clean = match waited {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                log_warn!("waiting for '{}' to stop failed: {err}", self.device.name);
                false
            }
            Err(_) => {
                log_warn!(
                    "camera '{}' did not stop within {:?}; releasing it anyway",
                    self.device.name,
                    self.stop_timeout
                );
                false
            }
        };

        log_info!(
            "capture session {} on '{}' stopped ({} frames)",
            self.id,
            self.device.name,
            self.stats().frames_received
        );
        clean
    }

    /// Encodes the latest frame as JPEG at `path`.
    pub async fn save_last_frame(&self, path: &Path) -> Result<Arc<Frame>> {
        let frame = self
            .last_frame()
            .context("no frame has been received from the camera yet")?;
        write_jpeg(Arc::clone(&frame), path.to_path_buf()).await?;
        Ok(frame)
    }
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("device", &self.device.name)
            .field("resolution", &self.resolution)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.signal_stop() {
            log_debug!(
                "capture session {} dropped while active; signalled '{}' to stop",
                self.id,
                self.device.name
            );
        }
    }
}

pub(crate) async fn write_jpeg(frame: Arc<Frame>, path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        frame
            .image
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("failed to write {}", path.display()))
    })
    .await
    .context("image writer join failed")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{live_session, FakeBehavior, FakeDevice, FakeSource};
    use image::Rgb;
    use tempfile::TempDir;

    #[tokio::test]
    async fn latest_frame_replaces_previous() {
        let source = FakeSource::new(vec![FakeDevice::new("cam", FakeBehavior::Healthy)]);
        let session = live_session(&source);
        let mut feed = session.subscribe();

        source.emit(0, &RgbImage::from_pixel(4, 4, Rgb([1, 1, 1])));
        source.emit(0, &RgbImage::from_pixel(4, 4, Rgb([9, 9, 9])));

        let frame = session.last_frame().unwrap();
        assert_eq!(frame.image.get_pixel(0, 0), &Rgb([9, 9, 9]));
        assert!(feed.has_changed().unwrap());
        let latest = feed.borrow_and_update().clone().unwrap();
        assert_eq!(latest.sequence, frame.sequence);

        session.stop().await;
    }

    #[tokio::test]
    async fn frame_errors_are_counted_not_fatal() {
        let source = FakeSource::new(vec![FakeDevice::new("cam", FakeBehavior::Healthy)]);
        let session = live_session(&source);

        source.emit_error(0, "corrupt buffer");
        assert!(session.is_running());
        assert_eq!(session.stats().frame_errors, 1);

        session.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_frame() {
        let source = FakeSource::new(vec![FakeDevice::new("cam", FakeBehavior::Healthy)]);
        let session = live_session(&source);
        assert!(session.last_frame().is_some());

        assert!(session.stop().await);
        assert!(!session.is_running());
        assert!(session.last_frame().is_none());
        assert!(session.stop().await);
        assert_eq!(source.running_now(), 0);
    }

    #[tokio::test]
    async fn frames_after_stop_are_not_delivered() {
        let source = FakeSource::new(vec![FakeDevice::new("cam", FakeBehavior::Healthy)]);
        let session = live_session(&source);
        session.stop().await;

        source.emit(0, &RgbImage::new(2, 2));
        assert!(session.last_frame().is_none());
    }

    // Real clock: the blocking stop wait keeps a paused clock from advancing.
    #[tokio::test]
    async fn hung_device_stop_returns_after_timeout() {
        let source = FakeSource::new(vec![FakeDevice::new("cam", FakeBehavior::HangsOnStop)]);
        let session = live_session(&source);

        let started = std::time::Instant::now();
        let clean = session.stop().await;
        let waited = started.elapsed();
        source.release_hung();

        assert!(!clean);
        assert!(!session.is_running());
        assert!(waited >= Duration::from_millis(200));
        assert!(waited < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn in_flight_delivery_after_stop_is_dropped() {
        let source = FakeSource::new(vec![FakeDevice::new("cam", FakeBehavior::Healthy)]);
        let session = live_session(&source);
        // Captured before stop, as a capture thread mid-delivery would hold it.
        let in_flight = session.frame_callback();

        session.stop().await;
        in_flight(FrameEvent::Frame(&RgbImage::new(2, 2)));

        assert!(session.last_frame().is_none());
        assert!(session.subscribe().borrow().is_none());
    }

    #[tokio::test]
    async fn signal_stop_halts_device_while_shared() {
        let source = FakeSource::new(vec![FakeDevice::new("cam", FakeBehavior::Healthy)]);
        let session = live_session(&source);
        let other_owner = Arc::clone(&session);

        assert!(session.signal_stop());
        assert!(!other_owner.is_running());
        assert_eq!(source.running_now(), 0);
        assert!(!session.signal_stop());
        assert!(other_owner.stop().await);
    }

    #[tokio::test]
    async fn saves_latest_frame_as_jpeg() {
        let dir = TempDir::new().unwrap();
        let source = FakeSource::new(vec![FakeDevice::new("cam", FakeBehavior::Healthy)]);
        let session = live_session(&source);

        let path = dir.path().join("snap").join("frame.jpg");
        session.save_last_frame(&path).await.unwrap();
        assert!(path.exists());

        session.stop().await;
    }
}
