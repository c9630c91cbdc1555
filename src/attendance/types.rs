use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Output of the external recognition engine. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub success: bool,
    /// Employee code the matched face was enrolled under.
    pub employee_identifier: String,
    pub employee_name: Option<String>,
    /// 0-100.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub captured_image_path: String,
    pub message: String,
}

impl RecognitionResult {
    pub fn matched(employee_identifier: impl Into<String>, confidence: f64, captured_image_path: impl Into<String>) -> Self {
        Self {
            success: true,
            employee_identifier: employee_identifier.into(),
            employee_name: None,
            confidence: confidence.clamp(0.0, 100.0),
            timestamp: Utc::now(),
            captured_image_path: captured_image_path.into(),
            message: String::new(),
        }
    }

    pub fn no_match(message: impl Into<String>) -> Self {
        Self {
            success: false,
            employee_identifier: String::new(),
            employee_name: None,
            confidence: 0.0,
            timestamp: Utc::now(),
            captured_image_path: String::new(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceType {
    CheckIn,
    CheckOut,
}

impl AttendanceType {
    pub fn label(&self) -> &'static str {
        match self {
            AttendanceType::CheckIn => "Check-in",
            AttendanceType::CheckOut => "Check-out",
        }
    }
}

impl fmt::Display for AttendanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reply of the external attendance service, which alone decides between
/// check-in and check-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceDecision {
    pub success: bool,
    pub attendance_type: Option<AttendanceType>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRecord {
    pub id: i64,
    pub code: String,
    pub full_name: String,
    pub status: String,
    pub department: Option<String>,
}

/// Reported by the recognition engine before recognition is enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SystemReadiness {
    pub ready: bool,
    pub message: String,
    pub error: Option<String>,
}

impl SystemReadiness {
    pub fn ready(message: impl Into<String>) -> Self {
        Self {
            ready: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn not_ready(error: impl Into<String>) -> Self {
        Self {
            ready: false,
            message: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn reason(&self) -> &str {
        self.error.as_deref().unwrap_or(&self.message)
    }
}

/// A verified, recorded attendance event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceOutcome {
    pub employee_id: i64,
    pub employee_code: String,
    pub employee_name: String,
    pub department: String,
    pub attendance_type: Option<AttendanceType>,
    pub confidence: f64,
    pub recognized_at: DateTime<Utc>,
    pub image_path: String,
    pub message: String,
}

impl AttendanceOutcome {
    pub fn summary(&self) -> String {
        let action = self
            .attendance_type
            .map(|kind| kind.label())
            .unwrap_or("Attendance");
        format!(
            "{action} recorded for {} - {} ({}, confidence {:.1}%)",
            self.employee_code, self.employee_name, self.department, self.confidence
        )
    }
}
