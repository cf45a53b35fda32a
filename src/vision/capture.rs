//! Capture source types and the frame-source seam
//!
//! The actual frame acquisition (ffmpeg subprocess, test fixtures) lives
//! behind `VideoBackend`/`FrameSource` so the capture loop never depends on a
//! concrete video subsystem.

use std::fmt;
use std::str::FromStr;

/// Where a camera's frames come from. Resolved once before handler
/// construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Stream URL or file path
    Path(String),
    /// Local device index (e.g. /dev/video0)
    DeviceIndex(u32),
}

impl FromStr for CaptureSource {
    type Err = std::convert::Infallible;

    /// A bare integer selects a local device; anything else is a URL/path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u32>() {
            Ok(index) => Ok(CaptureSource::DeviceIndex(index)),
            Err(_) => Ok(CaptureSource::Path(s.to_string())),
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureSource::Path(p) => write!(f, "{}", p),
            CaptureSource::DeviceIndex(i) => write!(f, "{}", i),
        }
    }
}

/// One decoded video frame, tightly packed RGB8
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height * 3) as usize);
        Self {
            width,
            height,
            pixels,
        }
    }
}

/// Errors from a capture read
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    /// One read failed; the loop logs and moves on
    #[error("transient capture failure: {0}")]
    Transient(String),
    /// The resource is gone; the loop must exit
    #[error("capture source lost: {0}")]
    Fatal(String),
}

/// Closure that forces the underlying OS resource closed from another
/// thread. Used when a capture loop does not observe the stop flag within
/// the bounded join window.
pub type ShutdownHandle = Box<dyn FnOnce() + Send>;

/// A live capture resource owned by one capture thread
pub trait FrameSource: Send {
    /// Blocking read of the next frame
    fn read(&mut self) -> std::result::Result<Frame, CaptureError>;

    /// Handle for forced release; default is a no-op
    fn shutdown_handle(&mut self) -> ShutdownHandle {
        Box::new(|| ())
    }
}

/// Opens capture resources. Shared by every handler in a registry.
pub trait VideoBackend: Send + Sync {
    fn open(
        &self,
        source: &CaptureSource,
    ) -> std::result::Result<Box<dyn FrameSource>, CaptureError>;
}
