use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::{sync::watch, time};

use crate::{
    attendance::{AttendanceRecorder, EmployeeRecord, SystemReadiness},
    camera::{CameraDevice, CameraManager, CaptureSession, Frame, FrameSource},
    diagnostics::{collect_report, SystemReport},
    enrollment::{EnrollmentSession, RegisteredFace},
    error::{CameraError, EnrollmentError, RecognitionError},
    ports::{AttendanceService, EnrollmentSink, IdentityProvider, RecognitionEngine},
    recognition::{RecognitionController, RecognitionSnapshot},
    settings::Settings,
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// External systems the station is wired to.
pub struct Collaborators {
    pub frames: Arc<dyn FrameSource>,
    pub engine: Arc<dyn RecognitionEngine>,
    pub attendance: Arc<dyn AttendanceService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub enrollment: Arc<dyn EnrollmentSink>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatus {
    pub camera_ready: bool,
    pub camera_error: Option<String>,
    pub engine: SystemReadiness,
    pub devices: Vec<CameraDevice>,
}

impl StationStatus {
    pub fn can_recognize(&self) -> bool {
        self.camera_ready && self.engine.ready
    }
}

/// One attendance kiosk: a camera, the recognition flow and enrollment.
pub struct AttendanceStation {
    settings: Settings,
    camera: CameraManager,
    recognition: RecognitionController,
    engine: Arc<dyn RecognitionEngine>,
    enrollment_sink: Arc<dyn EnrollmentSink>,
    readiness: Mutex<Option<SystemReadiness>>,
    closed: AtomicBool,
}

impl AttendanceStation {
    pub fn new(settings: Settings, collaborators: Collaborators) -> Self {
        let recorder = AttendanceRecorder::new(
            collaborators.identity,
            collaborators.attendance,
            settings.attendance.clone(),
        );
        let recognition = RecognitionController::new(
            Arc::clone(&collaborators.engine),
            Arc::new(recorder),
            settings.recognition.clone(),
        );
        Self {
            camera: CameraManager::new(collaborators.frames, settings.camera.clone()),
            recognition,
            engine: collaborators.engine,
            enrollment_sink: collaborators.enrollment,
            readiness: Mutex::new(None),
            closed: AtomicBool::new(false),
            settings,
        }
    }

    /// Checks the engine and starts the first camera. Failures are reported
    /// in the status rather than returned.
    pub async fn initialize(&self) -> StationStatus {
        let engine = self.check_engine().await;

        let (camera_ready, camera_error) = match self.camera.start(0).await {
            Ok(_) => (true, None),
            Err(err) => {
                log_error!("camera unavailable: {err}");
                (false, Some(err.to_string()))
            }
        };

        StationStatus {
            camera_ready,
            camera_error,
            engine,
            devices: self.camera.known_devices(),
        }
    }

    pub async fn check_engine(&self) -> SystemReadiness {
        let readiness = self.engine.check_system_ready().await;
        if readiness.ready {
            log_info!("recognition engine ready: {}", readiness.message);
        } else {
            log_warn!("recognition engine not ready: {}", readiness.reason());
        }
        *self.lock_readiness() = Some(readiness.clone());
        readiness
    }

    pub fn list_devices(&self) -> Result<Vec<CameraDevice>, CameraError> {
        self.camera.list_devices()
    }

    /// Stops the current camera, waits for the device to be released and
    /// starts `preferred` (falling back to the others).
    pub async fn restart_camera(&self, preferred: usize) -> Result<Arc<CaptureSession>, CameraError> {
        self.camera.stop().await;
        time::sleep(self.settings.camera.release_delay()).await;
        self.camera.start(preferred).await
    }

    pub async fn start_recognition(&self) -> Result<RecognitionSnapshot, RecognitionError> {
        if !self.camera.is_running() {
            return Err(RecognitionError::CameraNotReady);
        }

        let cached = self.lock_readiness().clone();
        let readiness = match cached {
            Some(readiness) => readiness,
            None => self.check_engine().await,
        };
        if !readiness.ready {
            return Err(RecognitionError::EngineNotReady(readiness.reason().to_string()));
        }

        self.recognition.start().await
    }

    pub async fn cancel_recognition(&self) -> Result<RecognitionSnapshot, RecognitionError> {
        self.recognition.cancel().await
    }

    pub async fn recognition_snapshot(&self) -> RecognitionSnapshot {
        self.recognition.get_snapshot().await
    }

    pub fn recognition_feed(&self) -> watch::Receiver<RecognitionSnapshot> {
        self.recognition.subscribe()
    }

    /// Live frames of the running camera, if there is one.
    pub fn frame_feed(&self) -> Option<watch::Receiver<Option<Arc<Frame>>>> {
        self.camera
            .active_session()
            .map(|session| session.subscribe())
    }

    pub async fn begin_enrollment(&self, employee: EmployeeRecord) -> Result<EnrollmentSession, EnrollmentError> {
        let session = self.running_session().ok_or(CameraError::NotRunning)?;
        log_info!("enrollment started for {}", employee.code);
        Ok(EnrollmentSession::new(
            employee,
            session,
            Arc::clone(&self.enrollment_sink),
            self.settings.enrollment.clone(),
        ))
    }

    pub async fn list_registered_faces(&self) -> Result<Vec<RegisteredFace>> {
        self.enrollment_sink.list_registered().await
    }

    pub async fn delete_registered_face(&self, employee_code: &str) -> Result<()> {
        self.enrollment_sink
            .delete_registered(employee_code)
            .await
            .with_context(|| format!("failed to delete registered face for {employee_code}"))?;
        log_info!("deleted registered face for {employee_code}");
        Ok(())
    }

    /// Saves the latest frame under the capture directory.
    pub async fn capture_snapshot(&self) -> Result<PathBuf> {
        let session = self.running_session().ok_or(CameraError::NotRunning)?;
        let path = self.settings.storage.capture_dir.join(format!(
            "capture_{}.jpg",
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        ));
        session.save_last_frame(&path).await?;
        Ok(path)
    }

    pub async fn system_report(&self) -> SystemReport {
        let devices = self
            .camera
            .list_devices()
            .unwrap_or_else(|_| self.camera.known_devices());
        let session = self.camera.active_session();
        let engine = self.lock_readiness().clone();
        let recognition = self.recognition.get_snapshot().await.state.status;
        collect_report(devices, session.as_deref(), engine, Some(recognition))
    }

    /// Cancels recognition and releases the camera. Safe to call twice.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.recognition.shutdown().await;
        if !self.camera.stop().await {
            log_warn!("camera did not confirm stop during shutdown");
        }
        log_info!("station closed");
    }

    fn running_session(&self) -> Option<Arc<CaptureSession>> {
        self.camera
            .active_session()
            .filter(|session| session.is_running())
    }

    fn lock_readiness(&self) -> std::sync::MutexGuard<'_, Option<SystemReadiness>> {
        match self.readiness.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for AttendanceStation {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log_warn!("station dropped without close; signalling the camera to stop");
        self.recognition.shutdown_now();
        self.camera.shutdown_now();
    }
}
