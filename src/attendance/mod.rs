pub mod recorder;
pub mod types;

pub use recorder::AttendanceRecorder;
pub use types::{
    AttendanceDecision, AttendanceOutcome, AttendanceType, EmployeeRecord, RecognitionResult,
    SystemReadiness,
};
