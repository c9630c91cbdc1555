//! Interfaces of the systems this pipeline talks to but does not own.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    attendance::{AttendanceDecision, EmployeeRecord, RecognitionResult, SystemReadiness},
    enrollment::{EnrollmentReceipt, RegisteredFace},
};

/// Face matcher. `recognize_from_camera` may take arbitrarily long or never
/// return; callers enforce their own deadline.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    async fn check_system_ready(&self) -> SystemReadiness;

    async fn recognize_from_camera(&self, timeout_secs: u64) -> RecognitionResult;
}

/// Persists attendance and decides check-in versus check-out.
#[async_trait]
pub trait AttendanceService: Send + Sync {
    async fn create_attendance_record(
        &self,
        employee_id: i64,
        method: &str,
        image_path: &str,
    ) -> Result<AttendanceDecision>;
}

/// Who is logged in, and which employee that account belongs to.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn is_logged_in(&self) -> bool;

    fn current_user_id(&self) -> Option<i64>;

    async fn employee_id_for_user(&self, user_id: i64) -> Result<Option<i64>>;

    async fn employee_by_id(&self, employee_id: i64) -> Result<Option<EmployeeRecord>>;
}

/// Receives finished enrollment batches and manages registered faces.
#[async_trait]
pub trait EnrollmentSink: Send + Sync {
    async fn enroll(&self, employee: &EmployeeRecord, samples: &[PathBuf]) -> Result<EnrollmentReceipt>;

    async fn list_registered(&self) -> Result<Vec<RegisteredFace>>;

    async fn delete_registered(&self, employee_code: &str) -> Result<()>;
}
