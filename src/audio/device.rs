//! CpalBackend - microphone capture via cpal
//!
//! ## Responsibilities
//!
//! - Open a mono input stream at the requested sample rate
//! - Regroup the device's native callback buffers into fixed-size i16 chunks
//! - Enumerate input-capable devices for the management API
//!
//! cpal streams are not Send, so the stream lives on a dedicated thread;
//! the listener loop consumes chunks over a bounded channel.

use crate::audio::capture::{AudioBackend, AudioDeviceInfo, SampleSource, StreamSpec};
use crate::vision::capture::{CaptureError, ShutdownHandle};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long open() waits for the stream thread to come up
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a chunk read blocks before reporting a transient stall
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Bounded chunk queue; a stalled consumer drops audio instead of growing
const CHUNK_QUEUE_DEPTH: usize = 8;

/// cpal-based audio input backend
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn open(
        &self,
        device_index: Option<u32>,
        spec: StreamSpec,
    ) -> std::result::Result<Box<dyn SampleSource>, CaptureError> {
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();
        let (chunk_tx, chunk_rx) = mpsc::sync_channel(CHUNK_QUEUE_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));

        let stream_stop = stop.clone();
        thread::Builder::new()
            .name("cpal-input".to_string())
            .spawn(move || run_stream(device_index, spec, chunk_tx, ready_tx, stream_stop))
            .map_err(|e| CaptureError::Fatal(format!("stream thread spawn failed: {}", e)))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Box::new(CpalSource {
                rx: chunk_rx,
                stop,
            })),
            Ok(Err(msg)) => Err(CaptureError::Fatal(msg)),
            Err(_) => {
                stop.store(true, Ordering::Release);
                Err(CaptureError::Fatal("audio stream open timed out".to_string()))
            }
        }
    }

    fn list_devices(&self) -> Vec<AudioDeviceInfo> {
        let host = cpal::default_host();
        let devices = match host.input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                tracing::error!(error = %e, "Error listing audio devices");
                return Vec::new();
            }
        };

        devices
            .enumerate()
            .filter_map(|(index, device)| {
                let config = device.default_input_config().ok()?;
                Some(AudioDeviceInfo {
                    index: index as u32,
                    name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
                    sample_rate: config.sample_rate().0,
                })
            })
            .collect()
    }
}

struct CpalSource {
    rx: mpsc::Receiver<Vec<i16>>,
    stop: Arc<AtomicBool>,
}

impl SampleSource for CpalSource {
    fn read_chunk(&mut self) -> std::result::Result<Vec<i16>, CaptureError> {
        match self.rx.recv_timeout(READ_TIMEOUT) {
            Ok(chunk) => Ok(chunk),
            Err(RecvTimeoutError::Timeout) => {
                Err(CaptureError::Transient("no audio data".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(CaptureError::Fatal("audio stream closed".to_string()))
            }
        }
    }

    fn shutdown_handle(&mut self) -> ShutdownHandle {
        let stop = self.stop.clone();
        Box::new(move || stop.store(true, Ordering::Release))
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Groups incoming sample buffers into fixed-size chunks
struct ChunkAccumulator {
    buf: Vec<i16>,
    chunk_size: usize,
    tx: SyncSender<Vec<i16>>,
}

impl ChunkAccumulator {
    fn new(chunk_size: usize, tx: SyncSender<Vec<i16>>) -> Self {
        Self {
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
            tx,
        }
    }

    fn push(&mut self, samples: impl Iterator<Item = i16>) {
        for sample in samples {
            self.buf.push(sample);
            if self.buf.len() == self.chunk_size {
                let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
                // Full queue means the listener stalled; drop the chunk
                let _ = self.tx.try_send(chunk);
            }
        }
    }
}

/// Owns the cpal stream for its whole lifetime on a dedicated thread
fn run_stream(
    device_index: Option<u32>,
    spec: StreamSpec,
    chunk_tx: SyncSender<Vec<i16>>,
    ready_tx: mpsc::Sender<std::result::Result<(), String>>,
    stop: Arc<AtomicBool>,
) {
    let host = cpal::default_host();

    let device = match device_index {
        Some(index) => host
            .input_devices()
            .ok()
            .and_then(|mut devices| devices.nth(index as usize)),
        None => host.default_input_device(),
    };
    let Some(device) = device else {
        let _ = ready_tx.send(Err("no matching audio input device".to_string()));
        return;
    };

    let sample_format = match device.default_input_config() {
        Ok(config) => config.sample_format(),
        Err(e) => {
            let _ = ready_tx.send(Err(format!("no input config: {}", e)));
            return;
        }
    };

    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(spec.sample_rate),
        buffer_size: BufferSize::Default,
    };

    let mut acc = ChunkAccumulator::new(spec.chunk_size, chunk_tx);
    let err_fn = |e: cpal::StreamError| {
        tracing::warn!(error = %e, "Audio stream error");
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                acc.push(data.iter().copied());
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                acc.push(data.iter().map(|&s| (s as i32 - 32768) as i16));
            },
            err_fn,
            None,
        ),
        _ => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                acc.push(
                    data.iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                );
            },
            err_fn,
            None,
        ),
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to build input stream: {}", e)));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(format!("failed to start input stream: {}", e)));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Hold the stream until the source is released; dropping it stops capture
    while !stop.load(Ordering::Acquire) {
        thread::park_timeout(Duration::from_millis(100));
    }
    drop(stream);
}
