use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::attendance::AttendanceOutcome;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RecognitionStatus {
    #[default]
    Idle,
    Running,
    /// The face was verified and the attendance service call is in flight.
    Recording,
    Success,
    Failed,
    TimedOut,
    Cancelled,
}

impl RecognitionStatus {
    /// Result states shown for a hold period before returning to idle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecognitionStatus::Success
                | RecognitionStatus::Failed
                | RecognitionStatus::TimedOut
                | RecognitionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionState {
    pub status: RecognitionStatus,
    pub attempt_id: Option<String>,
    pub timeout_ms: u64,
    pub elapsed_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub outcome: Option<AttendanceOutcome>,
    /// Bumped on every start; results and timers carry the generation they
    /// were issued under.
    #[serde(skip)]
    pub generation: u64,
    #[serde(skip)]
    pub running_anchor: Option<Instant>,
}

impl RecognitionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.status == RecognitionStatus::Running && self.generation == generation
    }

    pub fn is_recording(&self, generation: u64) -> bool {
        self.status == RecognitionStatus::Recording && self.generation == generation
    }

    /// Leaves `Running` for `Recording`, freezing the clock. Returns `false`
    /// when the attempt already ended.
    pub fn begin_recording(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.sync_elapsed_from_anchor();
        self.status = RecognitionStatus::Recording;
        self.running_anchor = None;
        true
    }

    pub fn current_elapsed_ms(&self) -> u64 {
        match (self.status, self.running_anchor) {
            (RecognitionStatus::Running, Some(anchor)) => anchor.elapsed().as_millis() as u64,
            _ => self.elapsed_ms,
        }
    }

    pub fn sync_elapsed_from_anchor(&mut self) {
        self.elapsed_ms = self.current_elapsed_ms();
    }

    pub fn remaining_secs(&self) -> u64 {
        if self.status != RecognitionStatus::Running {
            return 0;
        }
        let remaining_ms = self.timeout_ms.saturating_sub(self.current_elapsed_ms());
        remaining_ms.div_ceil(1000)
    }

    /// Share of the timeout already spent, 0-100.
    pub fn progress(&self) -> u8 {
        if self.timeout_ms == 0 {
            return if self.status == RecognitionStatus::Idle { 0 } else { 100 };
        }
        let percent = self.current_elapsed_ms().saturating_mul(100) / self.timeout_ms;
        percent.min(100) as u8
    }

    pub fn begin_attempt(
        &mut self,
        attempt_id: String,
        timeout_ms: u64,
        started_at: DateTime<Utc>,
        now: Instant,
    ) -> u64 {
        let generation = self.generation.wrapping_add(1);
        *self = Self {
            status: RecognitionStatus::Running,
            attempt_id: Some(attempt_id),
            timeout_ms,
            elapsed_ms: 0,
            started_at: Some(started_at),
            message: None,
            outcome: None,
            generation,
            running_anchor: Some(now),
        };
        generation
    }

    pub fn finish(
        &mut self,
        status: RecognitionStatus,
        message: impl Into<String>,
        outcome: Option<AttendanceOutcome>,
    ) {
        self.sync_elapsed_from_anchor();
        self.status = status;
        self.running_anchor = None;
        self.message = Some(message.into());
        self.outcome = outcome;
    }

    /// Back to idle, keeping the generation counter.
    pub fn reset(&mut self) {
        *self = Self {
            generation: self.generation,
            ..Self::default()
        };
    }
}
