//! Contract between the camera manager and a video-capture backend.
//!
//! A backend enumerates devices and hands out [`DeviceHandle`]s. Frames are
//! pushed to a registered callback from a backend-owned thread; the backend
//! may reuse the image buffer as soon as the callback returns.

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use super::device::{CameraDevice, Resolution};

pub enum FrameEvent<'a> {
    Frame(&'a RgbImage),
    /// A frame could not be decoded or delivered. Never fatal to the session.
    Error(String),
}

pub type FrameCallback = Arc<dyn Fn(FrameEvent<'_>) + Send + Sync>;

pub trait FrameSource: Send + Sync {
    fn enumerate(&self) -> Result<Vec<CameraDevice>>;

    /// Builds a handle for `device`. `resolution` is `None` when the device
    /// advertises no capabilities and its default mode should be used.
    fn open(&self, device: &CameraDevice, resolution: Option<Resolution>) -> Result<Arc<dyn DeviceHandle>>;
}

pub trait DeviceHandle: Send + Sync {
    /// Replaces the frame callback. `None` unregisters it; once this returns
    /// no further deliveries may start.
    fn set_frame_callback(&self, callback: Option<FrameCallback>);

    fn start(&self) -> Result<()>;

    /// Requests the capture thread to stop without waiting for it.
    fn signal_stop(&self);

    /// Blocks until the capture thread has exited.
    fn wait_for_stop(&self);

    fn is_running(&self) -> bool;
}
