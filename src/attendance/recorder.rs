use std::sync::Arc;

use chrono::Utc;

use super::types::{AttendanceOutcome, EmployeeRecord, RecognitionResult};
use crate::{
    error::VerificationError,
    ports::{AttendanceService, IdentityProvider},
    settings::AttendanceSettings,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const UNASSIGNED_DEPARTMENT: &str = "Unassigned";

/// Ties a recognized face to the logged-in account before anything is
/// written. A face match alone never records attendance.
pub struct AttendanceRecorder {
    identity: Arc<dyn IdentityProvider>,
    service: Arc<dyn AttendanceService>,
    settings: AttendanceSettings,
}

impl AttendanceRecorder {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        service: Arc<dyn AttendanceService>,
        settings: AttendanceSettings,
    ) -> Self {
        Self {
            identity,
            service,
            settings,
        }
    }

    /// Resolves the logged-in account to an active employee and checks that
    /// the recognized face belongs to them.
    pub async fn verify(&self, result: &RecognitionResult) -> Result<EmployeeRecord, VerificationError> {
        if !self.identity.is_logged_in() {
            return Err(VerificationError::NotLoggedIn);
        }
        let user_id = self
            .identity
            .current_user_id()
            .ok_or(VerificationError::NotLoggedIn)?;

        let employee_id = self
            .identity
            .employee_id_for_user(user_id)
            .await
            .map_err(|err| VerificationError::Lookup(format!("{err:#}")))?
            .ok_or(VerificationError::NoLinkedEmployee { user_id })?;

        let employee = self
            .identity
            .employee_by_id(employee_id)
            .await
            .map_err(|err| VerificationError::Lookup(format!("{err:#}")))?
            .ok_or(VerificationError::EmployeeNotFound { employee_id })?;

        if result.employee_identifier != employee.code {
            log_warn!(
                "face of {} presented on account {user_id} linked to {}",
                result.employee_identifier,
                employee.code
            );
            return Err(VerificationError::IdentityMismatch {
                recognized: result.employee_identifier.clone(),
                expected: employee.code,
            });
        }

        if employee.status != self.settings.active_status {
            return Err(VerificationError::EmployeeNotActive {
                name: employee.full_name,
                status: employee.status,
            });
        }

        Ok(employee)
    }

    /// Verifies `result` and, only if every check passes, asks the attendance
    /// service to record it. Exactly one record call per successful return.
    pub async fn verify_and_record(
        &self,
        result: &RecognitionResult,
    ) -> Result<AttendanceOutcome, VerificationError> {
        let employee = self.verify(result).await?;
        self.record(employee, result).await
    }

    /// Makes the single attendance-service call for an employee that already
    /// passed [`verify`](Self::verify). Never retried.
    pub async fn record(
        &self,
        employee: EmployeeRecord,
        result: &RecognitionResult,
    ) -> Result<AttendanceOutcome, VerificationError> {
        let decision = self
            .service
            .create_attendance_record(employee.id, &self.settings.method_tag, &result.captured_image_path)
            .await
            .map_err(|err| VerificationError::Persistence(format!("{err:#}")))?;
        if !decision.success {
            return Err(VerificationError::Persistence(decision.message));
        }

        let department = employee
            .department
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNASSIGNED_DEPARTMENT.to_string());

        let outcome = AttendanceOutcome {
            employee_id: employee.id,
            employee_code: employee.code,
            employee_name: employee.full_name,
            department,
            attendance_type: decision.attendance_type,
            confidence: result.confidence,
            recognized_at: Utc::now(),
            image_path: result.captured_image_path.clone(),
            message: decision.message,
        };
        log_info!("{}", outcome.summary());
        Ok(outcome)
    }
}
