//! In-memory collaborators for unit tests.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use image::{Rgb, RgbImage};

use crate::{
    attendance::{AttendanceDecision, AttendanceType, EmployeeRecord, RecognitionResult, SystemReadiness},
    camera::{CameraDevice, CaptureSession, DeviceHandle, FrameCallback, FrameEvent, FrameSource, Resolution},
    enrollment::{EnrollmentReceipt, RegisteredFace},
    ports::{AttendanceService, EnrollmentSink, IdentityProvider, RecognitionEngine},
};

// ---- camera ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    Healthy,
    FailOpen,
    FailStart,
    /// Starts without error but never reports running.
    NeverRuns,
    /// Reports running on the first poll, then drops out.
    Unstable,
    /// `wait_for_stop` blocks until `FakeSource::release_hung`.
    HangsOnStop,
    /// Fails to open the first `n` times, then behaves like `Healthy`.
    FailFirst(u32),
}

#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub name: String,
    pub behavior: FakeBehavior,
    pub resolutions: Vec<Resolution>,
}

impl FakeDevice {
    pub fn new(name: &str, behavior: FakeBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            resolutions: vec![
                Resolution::new(1280, 720),
                Resolution::new(640, 480),
                Resolution::new(320, 240),
            ],
        }
    }
}

#[derive(Default)]
struct Hang {
    released: Mutex<bool>,
    cond: Condvar,
}

#[derive(Default)]
struct Tracker {
    running: AtomicUsize,
    max_running: AtomicUsize,
    opens: Mutex<HashMap<String, u32>>,
    handles: Mutex<HashMap<usize, Arc<FakeHandle>>>,
    hang: Hang,
}

impl Tracker {
    fn started(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
    }

    fn stopped(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeSource {
    devices: Vec<FakeDevice>,
    tracker: Arc<Tracker>,
}

impl FakeSource {
    pub fn new(devices: Vec<FakeDevice>) -> Self {
        Self {
            devices,
            tracker: Arc::new(Tracker::default()),
        }
    }

    pub fn opens(&self, name: &str) -> u32 {
        self.tracker.opens.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn running_now(&self) -> usize {
        self.tracker.running.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.tracker.max_running.load(Ordering::SeqCst)
    }

    /// Last resolution requested for device `index`.
    pub fn requested_resolution(&self, index: usize) -> Option<Resolution> {
        self.latest(index).and_then(|handle| handle.resolution)
    }

    pub fn emit(&self, index: usize, image: &RgbImage) {
        if let Some(callback) = self.latest(index).and_then(|handle| handle.callback()) {
            callback(FrameEvent::Frame(image));
        }
    }

    pub fn emit_error(&self, index: usize, message: &str) {
        if let Some(callback) = self.latest(index).and_then(|handle| handle.callback()) {
            callback(FrameEvent::Error(message.to_string()));
        }
    }

    pub fn release_hung(&self) {
        *self.tracker.hang.released.lock().unwrap() = true;
        self.tracker.hang.cond.notify_all();
    }

    fn latest(&self, index: usize) -> Option<Arc<FakeHandle>> {
        self.tracker.handles.lock().unwrap().get(&index).cloned()
    }
}

impl FrameSource for FakeSource {
    fn enumerate(&self) -> Result<Vec<CameraDevice>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                CameraDevice::new(format!("fake:{index}"), device.name.clone(), device.resolutions.clone())
            })
            .collect())
    }

    fn open(&self, device: &CameraDevice, resolution: Option<Resolution>) -> Result<Arc<dyn DeviceHandle>> {
        let index = self
            .devices
            .iter()
            .position(|candidate| candidate.name == device.name)
            .ok_or_else(|| anyhow!("unknown device '{}'", device.name))?;
        let behavior = self.devices[index].behavior;

        let attempt = {
            let mut opens = self.tracker.opens.lock().unwrap();
            let count = opens.entry(device.name.clone()).or_insert(0);
            *count += 1;
            *count
        };

        match behavior {
            FakeBehavior::FailOpen => bail!("device '{}' is busy", device.name),
            FakeBehavior::FailFirst(n) if attempt <= n => {
                bail!("device '{}' is busy (attempt {attempt})", device.name)
            }
            _ => {}
        }

        let handle = Arc::new(FakeHandle {
            behavior,
            resolution,
            tracker: Arc::clone(&self.tracker),
            callback: Mutex::new(None),
            running: AtomicBool::new(false),
            polls: AtomicU32::new(0),
        });
        self.tracker
            .handles
            .lock()
            .unwrap()
            .insert(index, Arc::clone(&handle));
        Ok(handle)
    }
}

struct FakeHandle {
    behavior: FakeBehavior,
    resolution: Option<Resolution>,
    tracker: Arc<Tracker>,
    callback: Mutex<Option<FrameCallback>>,
    running: AtomicBool,
    polls: AtomicU32,
}

impl FakeHandle {
    fn callback(&self) -> Option<FrameCallback> {
        self.callback.lock().unwrap().clone()
    }
}

impl DeviceHandle for FakeHandle {
    fn set_frame_callback(&self, callback: Option<FrameCallback>) {
        *self.callback.lock().unwrap() = callback;
    }

    fn start(&self) -> Result<()> {
        match self.behavior {
            FakeBehavior::FailStart => bail!("device refused to start"),
            FakeBehavior::NeverRuns => return Ok(()),
            _ => {}
        }

        if !self.running.swap(true, Ordering::SeqCst) {
            self.tracker.started();
        }
        if let Some(callback) = self.callback() {
            let size = self.resolution.unwrap_or(Resolution::new(8, 8));
            let first = RgbImage::from_pixel(size.width, size.height, Rgb([128, 128, 128]));
            callback(FrameEvent::Frame(&first));
        }
        Ok(())
    }

    fn signal_stop(&self) {
        if self.behavior == FakeBehavior::HangsOnStop {
            return;
        }
        if self.running.swap(false, Ordering::SeqCst) {
            self.tracker.stopped();
        }
    }

    fn wait_for_stop(&self) {
        if self.behavior == FakeBehavior::HangsOnStop {
            let mut released = self.tracker.hang.released.lock().unwrap();
            while !*released {
                released = self.tracker.hang.cond.wait(released).unwrap();
            }
        }
        if self.running.swap(false, Ordering::SeqCst) {
            self.tracker.stopped();
        }
    }

    fn is_running(&self) -> bool {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst);
        if self.behavior == FakeBehavior::Unstable && polls > 0 {
            return false;
        }
        self.running.load(Ordering::SeqCst)
    }
}

/// Opens the first device of `source` and starts it outside the manager's
/// retry loop.
pub fn live_session(source: &FakeSource) -> Arc<CaptureSession> {
    let device = source.enumerate().unwrap().remove(0);
    let resolution = Some(Resolution::new(32, 24));
    let handle = source.open(&device, resolution).unwrap();
    let session = Arc::new(CaptureSession::new(
        device,
        resolution,
        handle,
        Duration::from_millis(200),
    ));
    session.handle().set_frame_callback(Some(session.frame_callback()));
    session.handle().start().unwrap();
    session.mark_running();
    session
}

// ---- recognition engine ----

#[derive(Clone)]
pub enum EngineScript {
    /// Never returns.
    Pending,
    Reply { after: Duration, result: RecognitionResult },
}

pub struct FakeEngine {
    script: Mutex<EngineScript>,
    readiness: Mutex<SystemReadiness>,
    calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new(script: EngineScript) -> Self {
        Self {
            script: Mutex::new(script),
            readiness: Mutex::new(SystemReadiness::ready("engine loaded")),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(after: Duration, result: RecognitionResult) -> Self {
        Self::new(EngineScript::Reply { after, result })
    }

    pub fn pending() -> Self {
        Self::new(EngineScript::Pending)
    }

    pub fn set_script(&self, script: EngineScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn set_readiness(&self, readiness: SystemReadiness) {
        *self.readiness.lock().unwrap() = readiness;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionEngine for FakeEngine {
    async fn check_system_ready(&self) -> SystemReadiness {
        self.readiness.lock().unwrap().clone()
    }

    async fn recognize_from_camera(&self, _timeout_secs: u64) -> RecognitionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        match script {
            EngineScript::Pending => std::future::pending::<RecognitionResult>().await,
            EngineScript::Reply { after, result } => {
                tokio::time::sleep(after).await;
                result
            }
        }
    }
}

// ---- identity & attendance ----

pub fn employee(id: i64, code: &str, name: &str, status: &str) -> EmployeeRecord {
    EmployeeRecord {
        id,
        code: code.to_string(),
        full_name: name.to_string(),
        status: status.to_string(),
        department: Some("Engineering".to_string()),
    }
}

#[derive(Default)]
pub struct FakeIdentity {
    pub user_id: Option<i64>,
    pub links: HashMap<i64, i64>,
    pub employees: HashMap<i64, EmployeeRecord>,
    pub fail_lookup: bool,
    /// Applied to every directory lookup.
    pub lookup_delay: Option<Duration>,
}

impl FakeIdentity {
    /// User 7 logged in and linked to `employee`.
    pub fn logged_in_as(employee: EmployeeRecord) -> Self {
        let mut identity = Self {
            user_id: Some(7),
            ..Self::default()
        };
        identity.links.insert(7, employee.id);
        identity.employees.insert(employee.id, employee);
        identity
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    fn is_logged_in(&self) -> bool {
        self.user_id.is_some()
    }

    fn current_user_id(&self) -> Option<i64> {
        self.user_id
    }

    async fn employee_id_for_user(&self, user_id: i64) -> Result<Option<i64>> {
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_lookup {
            bail!("directory unavailable");
        }
        Ok(self.links.get(&user_id).copied())
    }

    async fn employee_by_id(&self, employee_id: i64) -> Result<Option<EmployeeRecord>> {
        if self.fail_lookup {
            bail!("directory unavailable");
        }
        Ok(self.employees.get(&employee_id).cloned())
    }
}

#[derive(Default)]
pub struct FakeAttendance {
    pub calls: Mutex<Vec<(i64, String, String)>>,
    pub reject_with: Option<String>,
    pub fail_with: Option<String>,
    pub delay: Option<Duration>,
}

impl FakeAttendance {
    pub fn calls(&self) -> Vec<(i64, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AttendanceService for FakeAttendance {
    async fn create_attendance_record(
        &self,
        employee_id: i64,
        method: &str,
        image_path: &str,
    ) -> Result<AttendanceDecision> {
        let previous = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((employee_id, method.to_string(), image_path.to_string()));
            calls.len() - 1
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.fail_with {
            bail!("{error}");
        }
        if let Some(message) = &self.reject_with {
            return Ok(AttendanceDecision {
                success: false,
                attendance_type: None,
                message: message.clone(),
            });
        }
        let attendance_type = if previous % 2 == 0 {
            AttendanceType::CheckIn
        } else {
            AttendanceType::CheckOut
        };
        Ok(AttendanceDecision {
            success: true,
            attendance_type: Some(attendance_type),
            message: format!("{attendance_type} saved"),
        })
    }
}

// ---- enrollment ----

#[derive(Default)]
pub struct FakeEnrollmentSink {
    pub enrolled: Mutex<Vec<(String, Vec<PathBuf>)>>,
    pub registered: Mutex<Vec<RegisteredFace>>,
    pub reject_with: Option<String>,
    pub delay: Option<Duration>,
}

impl FakeEnrollmentSink {
    pub fn enrolled(&self) -> Vec<(String, Vec<PathBuf>)> {
        self.enrolled.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnrollmentSink for FakeEnrollmentSink {
    async fn enroll(&self, employee: &EmployeeRecord, samples: &[PathBuf]) -> Result<EnrollmentReceipt> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.reject_with {
            bail!("{reason}");
        }
        self.enrolled
            .lock()
            .unwrap()
            .push((employee.code.clone(), samples.to_vec()));
        self.registered.lock().unwrap().push(RegisteredFace {
            employee_code: employee.code.clone(),
            employee_name: employee.full_name.clone(),
            sample_count: samples.len(),
        });
        Ok(EnrollmentReceipt {
            employee_code: employee.code.clone(),
            accepted_samples: samples.len(),
            message: "registered".to_string(),
        })
    }

    async fn list_registered(&self) -> Result<Vec<RegisteredFace>> {
        Ok(self.registered.lock().unwrap().clone())
    }

    async fn delete_registered(&self, employee_code: &str) -> Result<()> {
        let mut registered = self.registered.lock().unwrap();
        let before = registered.len();
        registered.retain(|face| face.employee_code != employee_code);
        if registered.len() == before {
            bail!("no registered face for {employee_code}");
        }
        Ok(())
    }
}
