//! Audio capture seam
//!
//! Sample acquisition lives behind `AudioBackend`/`SampleSource`; the
//! listener loop only ever sees fixed-size i16 chunks.

use crate::vision::capture::{CaptureError, ShutdownHandle};
use serde::Serialize;

/// Requested stream parameters
#[derive(Debug, Clone, Copy)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub chunk_size: usize,
}

/// An input-capable audio device, for the management API
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub index: u32,
    pub name: String,
    pub sample_rate: u32,
}

/// A live audio input stream owned by one listener thread
pub trait SampleSource: Send {
    /// Blocking read of one fixed-size chunk of mono i16 samples
    fn read_chunk(&mut self) -> std::result::Result<Vec<i16>, CaptureError>;

    /// Handle for forced release; default is a no-op
    fn shutdown_handle(&mut self) -> ShutdownHandle {
        Box::new(|| ())
    }
}

/// Opens audio input streams and enumerates devices
pub trait AudioBackend: Send + Sync {
    fn open(
        &self,
        device_index: Option<u32>,
        spec: StreamSpec,
    ) -> std::result::Result<Box<dyn SampleSource>, CaptureError>;

    /// List input-capable devices; failures degrade to an empty list
    fn list_devices(&self) -> Vec<AudioDeviceInfo>;
}
