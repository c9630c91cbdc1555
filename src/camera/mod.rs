pub mod device;
pub mod manager;
pub mod session;
pub mod source;
pub mod synthetic;

pub use device::{select_resolution, CameraDevice, Resolution};
pub use manager::CameraManager;
pub use session::{CaptureSession, CaptureStats, Frame};
pub use source::{DeviceHandle, FrameCallback, FrameEvent, FrameSource};
pub use synthetic::SyntheticSource;
