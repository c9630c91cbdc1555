use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnrollmentError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SampleHandle(u64);

impl SampleHandle {
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SampleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub handle: SampleHandle,
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentReceipt {
    pub employee_code: String,
    pub accepted_samples: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredFace {
    pub employee_code: String,
    pub employee_name: String,
    pub sample_count: usize,
}

/// Samples captured for one employee, in capture order. Sequence numbers are
/// never reused within a batch, even after removals.
#[derive(Debug)]
pub struct EnrollmentBatch {
    employee_code: String,
    min_samples: usize,
    samples: Vec<Sample>,
    next_sequence: u64,
}

impl EnrollmentBatch {
    pub fn new(employee_code: impl Into<String>, min_samples: usize) -> Self {
        Self {
            employee_code: employee_code.into(),
            min_samples,
            samples: Vec::new(),
            next_sequence: 1,
        }
    }

    pub fn employee_code(&self) -> &str {
        &self.employee_code
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.samples.iter().map(|sample| sample.path.clone()).collect()
    }

    /// File name the next sample will be written under.
    pub fn next_file_name(&self, captured_at: DateTime<Utc>) -> String {
        sample_file_name(&self.employee_code, captured_at, self.next_sequence)
    }

    pub fn push(&mut self, path: PathBuf, captured_at: DateTime<Utc>) -> SampleHandle {
        let handle = SampleHandle(self.next_sequence);
        self.next_sequence += 1;
        self.samples.push(Sample {
            handle,
            path,
            captured_at,
        });
        handle
    }

    pub fn remove(&mut self, handle: SampleHandle) -> Result<Sample, EnrollmentError> {
        let position = self
            .samples
            .iter()
            .position(|sample| sample.handle == handle)
            .ok_or(EnrollmentError::UnknownSample(handle.0))?;
        Ok(self.samples.remove(position))
    }

    pub fn ensure_ready(&self) -> Result<(), EnrollmentError> {
        if self.samples.len() < self.min_samples {
            return Err(EnrollmentError::InsufficientSamples {
                captured: self.samples.len(),
                required: self.min_samples,
            });
        }
        Ok(())
    }

    pub fn take(&mut self) -> Vec<Sample> {
        std::mem::take(&mut self.samples)
    }
}

/// `employee_<code>_<yyyyMMdd_HHmmss_mmm>_<seq>.jpg`, with anything outside
/// `[A-Za-z0-9-]` in the code replaced.
pub fn sample_file_name(employee_code: &str, captured_at: DateTime<Utc>, sequence: u64) -> String {
    let code: String = employee_code
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    format!(
        "employee_{code}_{}_{sequence:03}.jpg",
        captured_at.format("%Y%m%d_%H%M%S_%3f")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_names_are_unique_and_sanitised() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 8, 5, 1).unwrap();
        assert_eq!(
            sample_file_name("NV/01 a", at, 7),
            "employee_NV-01-a_20240309_080501_000_007.jpg"
        );
        assert_ne!(sample_file_name("NV01", at, 1), sample_file_name("NV01", at, 2));
    }

    #[test]
    fn removal_keeps_order_and_never_reuses_sequence() {
        let mut batch = EnrollmentBatch::new("NV01", 2);
        let now = Utc::now();
        let first = batch.push("a.jpg".into(), now);
        let second = batch.push("b.jpg".into(), now);
        let third = batch.push("c.jpg".into(), now);

        batch.remove(second).unwrap();
        let fourth = batch.push("d.jpg".into(), now);

        let order: Vec<_> = batch.samples().iter().map(|s| s.handle).collect();
        assert_eq!(order, vec![first, third, fourth]);
        assert_eq!(fourth.sequence(), 4);
        assert!(matches!(
            batch.remove(second),
            Err(EnrollmentError::UnknownSample(2))
        ));
    }

    #[test]
    fn readiness_requires_minimum_samples() {
        let mut batch = EnrollmentBatch::new("NV01", 3);
        batch.push("a.jpg".into(), Utc::now());
        batch.push("b.jpg".into(), Utc::now());

        assert!(matches!(
            batch.ensure_ready(),
            Err(EnrollmentError::InsufficientSamples {
                captured: 2,
                required: 3
            })
        ));
        batch.push("c.jpg".into(), Utc::now());
        assert!(batch.ensure_ready().is_ok());

        assert_eq!(batch.take().len(), 3);
        assert!(batch.is_empty());
    }
}
