use std::sync::Arc;

use tokio::time;

use super::batch::{EnrollmentBatch, EnrollmentReceipt, Sample, SampleHandle};
use crate::{
    attendance::EmployeeRecord,
    camera::{session::write_jpeg, CaptureSession},
    error::{CameraError, EnrollmentError},
    ports::EnrollmentSink,
    settings::EnrollmentSettings,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Collects face samples for one employee from the running camera and hands
/// the finished batch to the enrollment sink.
pub struct EnrollmentSession {
    employee: EmployeeRecord,
    camera: Arc<CaptureSession>,
    sink: Arc<dyn EnrollmentSink>,
    settings: EnrollmentSettings,
    batch: EnrollmentBatch,
}

impl EnrollmentSession {
    pub fn new(
        employee: EmployeeRecord,
        camera: Arc<CaptureSession>,
        sink: Arc<dyn EnrollmentSink>,
        settings: EnrollmentSettings,
    ) -> Self {
        let batch = EnrollmentBatch::new(employee.code.clone(), settings.min_samples);
        Self {
            employee,
            camera,
            sink,
            settings,
            batch,
        }
    }

    pub fn employee(&self) -> &EmployeeRecord {
        &self.employee
    }

    pub fn count(&self) -> usize {
        self.batch.len()
    }

    pub fn samples(&self) -> &[Sample] {
        self.batch.samples()
    }

    pub fn is_ready(&self) -> bool {
        self.batch.ensure_ready().is_ok()
    }

    /// Saves the latest camera frame as the next sample.
    pub async fn capture(&mut self) -> Result<SampleHandle, EnrollmentError> {
        if !self.camera.is_running() {
            return Err(CameraError::NotRunning.into());
        }
        let frame = self.camera.last_frame().ok_or(CameraError::NoFrame)?;

        let captured_at = frame.captured_at;
        let path = self
            .settings
            .sample_dir
            .join(self.batch.next_file_name(captured_at));
        write_jpeg(frame, path.clone())
            .await
            .map_err(|err| EnrollmentError::Storage(format!("{err:#}")))?;

        let handle = self.batch.push(path, captured_at);
        log_info!(
            "captured enrollment sample {handle} for {} ({} total)",
            self.employee.code,
            self.batch.len()
        );
        Ok(handle)
    }

    /// Drops a sample from the batch and deletes its file.
    pub async fn remove(&mut self, handle: SampleHandle) -> Result<(), EnrollmentError> {
        let sample = self.batch.remove(handle)?;
        delete_sample(&sample).await;
        Ok(())
    }

    /// Submits the batch. On success the batch is cleared; on failure it is
    /// kept so the caller can retry or add samples.
    pub async fn finalize(&mut self) -> Result<EnrollmentReceipt, EnrollmentError> {
        self.batch.ensure_ready()?;

        let paths = self.batch.paths();
        let limit = self.settings.finalize_timeout_secs;
        let receipt = match time::timeout(
            time::Duration::from_secs(limit),
            self.sink.enroll(&self.employee, &paths),
        )
        .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(err)) => {
                log_warn!("enrollment for {} rejected: {err:#}", self.employee.code);
                return Err(EnrollmentError::Rejected(format!("{err:#}")));
            }
            Err(_) => return Err(EnrollmentError::Timeout(limit)),
        };

        self.batch.take();
        log_info!(
            "enrolled {} with {} sample(s)",
            self.employee.code,
            receipt.accepted_samples
        );
        Ok(receipt)
    }

    /// Empties the batch and deletes every captured file.
    pub async fn discard(&mut self) {
        for sample in self.batch.take() {
            delete_sample(&sample).await;
        }
    }
}

async fn delete_sample(sample: &Sample) {
    if let Err(err) = tokio::fs::remove_file(&sample.path).await {
        log_warn!(
            "could not delete enrollment sample {}: {err}",
            sample.path.display()
        );
    }
}
