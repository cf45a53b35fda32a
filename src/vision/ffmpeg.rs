//! FfmpegBackend - frame acquisition via an ffmpeg subprocess
//!
//! ## Responsibilities
//!
//! - Spawn ffmpeg against an RTSP/HTTP URL, file path, or v4l2 device
//! - Stream MJPEG frames over a pipe and decode them to RGB
//! - Kill the subprocess on forced release so a blocked read fails instead
//!   of hanging the capture thread

use crate::vision::capture::{
    CaptureError, CaptureSource, Frame, FrameSource, ShutdownHandle, VideoBackend,
};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

/// JPEG start-of-image / end-of-image markers
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Cap on a single MJPEG frame; anything larger means a desynced stream
const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

/// Opens ffmpeg MJPEG pipes for camera sources
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }

    fn build_command(source: &CaptureSource) -> Command {
        let mut cmd = Command::new("ffmpeg");
        match source {
            CaptureSource::Path(url) => {
                // TCP transport is more reliable for RTSP cameras
                if url.starts_with("rtsp://") {
                    cmd.args(["-rtsp_transport", "tcp"]);
                }
                cmd.args(["-i", url]);
            }
            CaptureSource::DeviceIndex(index) => {
                cmd.args(["-f", "v4l2", "-i", &format!("/dev/video{}", index)]);
            }
        }
        cmd.args([
            "-f",
            "image2pipe",
            "-vcodec",
            "mjpeg",
            "-q:v",
            "5",
            "-loglevel",
            "error",
            "-",
        ]);
        cmd.stdout(Stdio::piped()).stderr(Stdio::null()).stdin(Stdio::null());
        cmd
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoBackend for FfmpegBackend {
    fn open(
        &self,
        source: &CaptureSource,
    ) -> std::result::Result<Box<dyn FrameSource>, CaptureError> {
        let mut child = Self::build_command(source)
            .spawn()
            .map_err(|e| CaptureError::Fatal(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Fatal("ffmpeg stdout missing".to_string()))?;

        let mut ffmpeg = FfmpegSource {
            stdout,
            child: Arc::new(Mutex::new(child)),
            buf: Vec::new(),
            pending: None,
        };

        // Block for the first frame so a bad source fails the open instead
        // of producing a dead handler. ffmpeg exits promptly (EOF here) when
        // it cannot connect.
        match ffmpeg.read() {
            Ok(frame) => {
                ffmpeg.pending = Some(frame);
                Ok(Box::new(ffmpeg))
            }
            Err(e) => {
                ffmpeg.kill();
                Err(CaptureError::Fatal(format!("no frames from source: {}", e)))
            }
        }
    }
}

struct FfmpegSource {
    stdout: ChildStdout,
    child: Arc<Mutex<Child>>,
    buf: Vec<u8>,
    pending: Option<Frame>,
}

impl FfmpegSource {
    fn kill(&self) {
        kill_child(&self.child);
    }

    /// Pull bytes until the buffer holds one complete JPEG, then return it
    fn next_jpeg(&mut self) -> std::result::Result<Vec<u8>, CaptureError> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(jpeg) = extract_jpeg(&mut self.buf) {
                return Ok(jpeg);
            }
            if self.buf.len() > MAX_FRAME_BYTES {
                self.buf.clear();
                return Err(CaptureError::Transient("MJPEG stream desynced".to_string()));
            }

            let n = self
                .stdout
                .read(&mut chunk)
                .map_err(|e| CaptureError::Fatal(format!("pipe read failed: {}", e)))?;
            if n == 0 {
                return Err(CaptureError::Fatal("ffmpeg stream ended".to_string()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> std::result::Result<Frame, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }

        let jpeg = self.next_jpeg()?;
        let decoded = image::load_from_memory(&jpeg)
            .map_err(|e| CaptureError::Transient(format!("JPEG decode failed: {}", e)))?
            .to_rgb8();

        let (width, height) = decoded.dimensions();
        Ok(Frame::new(width, height, decoded.into_raw()))
    }

    fn shutdown_handle(&mut self) -> ShutdownHandle {
        let child = self.child.clone();
        Box::new(move || kill_child(&child))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        // Teardown is best-effort; kill/wait errors are swallowed
        self.kill();
    }
}

fn kill_child(child: &Arc<Mutex<Child>>) {
    if let Ok(mut child) = child.lock() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Remove and return the first complete JPEG (SOI..EOI) from the buffer
fn extract_jpeg(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = find_marker(buf, &SOI, 0)?;
    let end = find_marker(buf, &EOI, start + 2)?;
    let jpeg = buf[start..end + 2].to_vec();
    buf.drain(..end + 2);
    Some(jpeg)
}

fn find_marker(buf: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if buf.len() < from + 2 {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|p| p + from)
}
