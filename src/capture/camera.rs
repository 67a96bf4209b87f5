//! Camera collaborator interface
//!
//! Backend selection and pixel formats belong to the camera implementation.
//! The orchestrator only needs a frame, its shape, and when it was taken.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Camera attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    Usb,
    Csi,
    Ip,
}

impl fmt::Display for CameraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CameraKind::Usb => "usb",
            CameraKind::Csi => "csi",
            CameraKind::Ip => "ip",
        };
        f.write_str(name)
    }
}

/// What a camera reports about itself
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraInfo {
    pub kind: CameraKind,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Backend name (v4l2, gstreamer, ...)
    pub backend: String,
}

/// One captured image
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Raw pixel data, row-major
    pub data: Vec<u8>,
    /// Monotonic seconds when the frame was taken
    pub captured_at: f64,
}

impl Frame {
    /// `[height, width, channels]`
    pub fn shape(&self) -> [u32; 3] {
        [self.height, self.width, self.channels]
    }
}

/// A camera the orchestrator can pull frames from
pub trait CameraSource: Send {
    /// Grab one frame
    fn capture_frame(&mut self) -> Result<Frame>;

    /// Resolution, frame rate and backend
    fn info(&self) -> CameraInfo;

    /// Release the device; called once during cleanup
    fn disconnect(&mut self);
}

impl<C: CameraSource + ?Sized> CameraSource for Box<C> {
    fn capture_frame(&mut self) -> Result<Frame> {
        (**self).capture_frame()
    }

    fn info(&self) -> CameraInfo {
        (**self).info()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}
