pub mod batch;
pub mod capture;

pub use batch::{sample_file_name, EnrollmentBatch, EnrollmentReceipt, RegisteredFace, Sample, SampleHandle};
pub use capture::EnrollmentSession;
