use thiserror::Error;

/// Coarse grouping used by callers to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Device,
    Recognition,
    Verification,
    Persistence,
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera device found; check that a camera is connected, its driver is installed and camera access is allowed, then restart the camera")]
    NoDeviceFound,

    #[error("camera could not be started after {rounds} round(s) across {devices} device(s): {last_error}. Close other applications using the camera (video calls, other capture tools), reconnect the device, or check driver and permission settings")]
    StartFailed {
        rounds: u32,
        devices: usize,
        last_error: String,
    },

    #[error("device index {index} out of range ({available} device(s) available)")]
    InvalidDevice { index: usize, available: usize },

    #[error("camera is not running")]
    NotRunning,

    #[error("no frame has been received from the camera yet")]
    NoFrame,

    #[error("device enumeration failed: {0}")]
    Enumeration(String),
}

impl CameraError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Device
    }

    /// Fatal errors disable the start action until the camera is restarted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CameraError::NoDeviceFound | CameraError::StartFailed { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("a recognition attempt is already running")]
    AlreadyRunning,

    #[error("no recognition attempt is running")]
    NotRunning,

    #[error("attendance is being recorded and can no longer be cancelled")]
    RecordingInProgress,

    #[error("camera is not ready")]
    CameraNotReady,

    #[error("recognition engine is not ready: {0}")]
    EngineNotReady(String),
}

impl RecognitionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RecognitionError::CameraNotReady => ErrorCategory::Device,
            _ => ErrorCategory::Recognition,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("no user is logged in; log in before checking in with face recognition")]
    NotLoggedIn,

    #[error("account {user_id} is not linked to an employee")]
    NoLinkedEmployee { user_id: i64 },

    #[error("linked employee {employee_id} no longer exists")]
    EmployeeNotFound { employee_id: i64 },

    #[error("recognized face belongs to employee {recognized} but the logged-in account is linked to employee {expected}")]
    IdentityMismatch { recognized: String, expected: String },

    #[error("employee {name} is not currently employed (status: {status})")]
    EmployeeNotActive { name: String, status: String },

    #[error("identity lookup failed: {0}")]
    Lookup(String),

    #[error("failed to save attendance: {0}")]
    Persistence(String),
}

impl VerificationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            VerificationError::Persistence(_) => ErrorCategory::Persistence,
            _ => ErrorCategory::Verification,
        }
    }
}

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("at least {required} samples are required, {captured} captured")]
    InsufficientSamples { captured: usize, required: usize },

    #[error("sample {0} is not part of this batch")]
    UnknownSample(u64),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("failed to store sample: {0}")]
    Storage(String),

    #[error("enrollment was rejected: {0}")]
    Rejected(String),

    #[error("enrollment did not complete within {0}s")]
    Timeout(u64),
}

impl EnrollmentError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EnrollmentError::Camera(_) => ErrorCategory::Device,
            EnrollmentError::Storage(_) | EnrollmentError::Rejected(_) | EnrollmentError::Timeout(_) => {
                ErrorCategory::Persistence
            }
            _ => ErrorCategory::Verification,
        }
    }
}
