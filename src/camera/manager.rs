use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use anyhow::{bail, Context, Result};
use tokio::time::{self, Instant};

use super::{
    device::{select_resolution, CameraDevice, Resolution},
    session::CaptureSession,
    source::FrameSource,
};
use crate::{error::CameraError, settings::CameraSettings};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Owns at most one running capture session and knows how to coax a flaky
/// device into starting.
pub struct CameraManager {
    source: Arc<dyn FrameSource>,
    settings: CameraSettings,
    devices: Mutex<Vec<CameraDevice>>,
    active: Mutex<Option<Arc<CaptureSession>>>,
    /// Serialises start and stop; never held by readers.
    lifecycle: tokio::sync::Mutex<()>,
    starting: AtomicBool,
}

/// Clears the starting flag however `start` exits.
struct StartingGuard<'a>(&'a AtomicBool);

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CameraManager {
    pub fn new(source: Arc<dyn FrameSource>, settings: CameraSettings) -> Self {
        Self {
            source,
            settings,
            devices: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            starting: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// Enumerates attached devices and caches the list.
    pub fn list_devices(&self) -> Result<Vec<CameraDevice>, CameraError> {
        let devices = self
            .source
            .enumerate()
            .map_err(|err| CameraError::Enumeration(format!("{err:#}")))?;
        if devices.is_empty() {
            return Err(CameraError::NoDeviceFound);
        }

        let mut cached = match self.devices.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cached.clone_from(&devices);
        Ok(devices)
    }

    /// Devices seen by the last successful enumeration.
    pub fn known_devices(&self) -> Vec<CameraDevice> {
        match self.devices.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn active_session(&self) -> Option<Arc<CaptureSession>> {
        self.lock_active().clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock_active()
            .as_ref()
            .is_some_and(|session| session.is_running())
    }

    /// True while `start` is working through devices.
    pub fn is_starting(&self) -> bool {
        self.starting.load(Ordering::SeqCst)
    }

    /// Starts capture, trying `preferred` first and then every other device,
    /// for up to `start_rounds` rounds. Any running session is stopped before
    /// each device attempt.
    pub async fn start(&self, preferred: usize) -> Result<Arc<CaptureSession>, CameraError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.starting.store(true, Ordering::SeqCst);
        let _starting = StartingGuard(&self.starting);

        let devices = self.list_devices()?;
        if preferred >= devices.len() {
            return Err(CameraError::InvalidDevice {
                index: preferred,
                available: devices.len(),
            });
        }

        let order: Vec<&CameraDevice> = devices[preferred..]
            .iter()
            .chain(devices[..preferred].iter())
            .collect();
        let rounds = self.settings.start_rounds.max(1);
        let mut last_error = String::new();

        for round in 1..=rounds {
            for device in &order {
                let previous = self.lock_active().take();
                if let Some(previous) = previous {
                    previous.stop().await;
                }
                time::sleep(self.settings.release_delay()).await;

                log_info!("starting camera '{}' (round {round}/{rounds})", device.name);
                match self.try_start(device).await {
                    Ok(session) => {
                        log_info!(
                            "camera '{}' running at {}",
                            device.name,
                            session
                                .resolution()
                                .map(|res| res.to_string())
                                .unwrap_or_else(|| "default mode".to_string())
                        );
                        *self.lock_active() = Some(Arc::clone(&session));
                        return Ok(session);
                    }
                    Err(err) => {
                        log_warn!("camera '{}' failed to start: {err:#}", device.name);
                        last_error = format!("{}: {err:#}", device.name);
                    }
                }
            }

            if round < rounds {
                time::sleep(self.settings.round_backoff()).await;
            }
        }

        Err(CameraError::StartFailed {
            rounds,
            devices: devices.len(),
            last_error,
        })
    }

    /// Stops the running session, if any, after any start in progress has
    /// finished. Returns `false` when the device did not confirm the stop in
    /// time.
    pub async fn stop(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let session = self.lock_active().take();
        match session {
            Some(session) => session.stop().await,
            None => true,
        }
    }

    /// Non-blocking stop signal for teardown paths that cannot await. The
    /// device is signalled even while other owners still hold the session.
    pub fn shutdown_now(&self) {
        let session = self.lock_active().take();
        if let Some(session) = session {
            session.signal_stop();
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<Arc<CaptureSession>>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn try_start(&self, device: &CameraDevice) -> Result<Arc<CaptureSession>> {
        let max = Resolution::new(self.settings.max_width, self.settings.max_height);
        let resolution = select_resolution(&device.resolutions, max);

        let handle = self
            .source
            .open(device, resolution)
            .context("could not open device")?;
        let session = Arc::new(CaptureSession::new(
            device.clone(),
            resolution,
            handle,
            self.settings.stop_timeout(),
        ));
        session.handle().set_frame_callback(Some(session.frame_callback()));

        if let Err(err) = session.handle().start() {
            session.stop().await;
            return Err(err.context("device refused to start"));
        }

        if !self.wait_until_running(&session).await {
            session.stop().await;
            bail!(
                "device did not report running within {:?}",
                self.settings.start_poll_timeout()
            );
        }

        time::sleep(self.settings.stability_delay()).await;
        if !session.handle().is_running() {
            session.stop().await;
            bail!("device stopped during the stability check");
        }

        session.mark_running();
        Ok(session)
    }

    async fn wait_until_running(&self, session: &CaptureSession) -> bool {
        let deadline = Instant::now() + self.settings.start_poll_timeout();
        loop {
            if session.handle().is_running() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            time::sleep(self.settings.start_poll_interval()).await;
        }
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
