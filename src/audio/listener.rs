//! AudioListener - one microphone, one listener thread
//!
//! ## Responsibilities
//!
//! - Run an isolated loop reading fixed-size sample chunks
//! - Compute normalized RMS amplitude and gate on a threshold
//! - Debounce accepted events with a per-device cooldown
//! - Fire the callback with classified AudioEvents

use crate::audio::capture::{AudioBackend, SampleSource, StreamSpec};
use crate::error::{Error, Result};
use crate::vision::capture::{CaptureError, ShutdownHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long stop() waits for the listener loop to observe the flag
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum representable i16 magnitude, for 0..1 normalization
const I16_FULL_SCALE: f32 = 32768.0;

/// Callback fired once per accepted audio event, on the listener thread
pub type AudioCallback = Arc<dyn Fn(AudioEvent) + Send + Sync>;

/// An audio anomaly event
#[derive(Debug, Clone, Serialize)]
pub struct AudioEvent {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Normalized amplitude, 0..1
    pub amplitude: f32,
    pub description: String,
    pub device_id: String,
}

/// Per-listener audio tuning
#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub threshold: f32,
    pub spec: StreamSpec,
    pub cooldown_ms: i64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            spec: StreamSpec {
                sample_rate: 44100,
                chunk_size: 1024,
            },
            cooldown_ms: 2000,
        }
    }
}

/// Normalized RMS amplitude of an i16 chunk: sqrt(mean(x^2)) / 32768
pub fn normalized_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64;
            v * v
        })
        .sum();
    ((sum_sq / samples.len() as f64).sqrt() / I16_FULL_SCALE as f64) as f32
}

/// Severity classification by amplitude band
pub fn describe_amplitude(amplitude: f32) -> &'static str {
    if amplitude >= 0.9 {
        "Loud noise detected - possible scream or alarm"
    } else if amplitude >= 0.8 {
        "High amplitude sound detected"
    } else {
        "Audio threshold exceeded"
    }
}

/// Cooldown gate between accepted events.
///
/// The last-event timestamp advances only on acceptance, so sustained loud
/// noise produces one event per cooldown window, not one per chunk.
#[derive(Debug)]
pub struct CooldownGate {
    cooldown_ms: i64,
    last_event_ms: i64,
}

impl CooldownGate {
    pub fn new(cooldown_ms: i64) -> Self {
        Self {
            cooldown_ms,
            last_event_ms: 0,
        }
    }

    /// Returns true and records the timestamp when the event is accepted
    pub fn accept(&mut self, now_ms: i64) -> bool {
        if now_ms - self.last_event_ms < self.cooldown_ms {
            return false;
        }
        self.last_event_ms = now_ms;
        true
    }
}

/// Listens for audio anomalies from one input device
pub struct AudioListener {
    device_id: String,
    device_index: Option<u32>,
    settings: AudioSettings,
    backend: Arc<dyn AudioBackend>,
    on_event: Option<AudioCallback>,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    done_rx: Option<mpsc::Receiver<()>>,
    shutdown: Option<ShutdownHandle>,
    stop_timeout: Duration,
}

impl AudioListener {
    pub fn new(
        device_id: String,
        device_index: Option<u32>,
        settings: AudioSettings,
        backend: Arc<dyn AudioBackend>,
        on_event: Option<AudioCallback>,
    ) -> Self {
        Self {
            device_id,
            device_index,
            settings,
            backend,
            on_event,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            done_rx: None,
            shutdown: None,
            stop_timeout: STOP_JOIN_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_stop_timeout(&mut self, timeout: Duration) {
        self.stop_timeout = timeout;
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn threshold(&self) -> f32 {
        self.settings.threshold
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Open the input stream and launch the listener thread.
    /// Idempotent when already running; fails cleanly when the audio
    /// subsystem is unavailable.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::warn!(device_id = %self.device_id, "Audio listener is already running");
            return Ok(());
        }

        let mut source = self
            .backend
            .open(self.device_index, self.settings.spec)
            .map_err(|e| Error::Capture(format!("failed to open audio input: {}", e)))?;

        let shutdown = source.shutdown_handle();
        let (done_tx, done_rx) = mpsc::channel();

        // Fresh flag per start: a previous loop that was force-released and
        // detached still stores false into its own flag when it exits, which
        // must not touch this run.
        self.running = Arc::new(AtomicBool::new(true));

        let ctx = ListenContext {
            device_id: self.device_id.clone(),
            threshold: self.settings.threshold,
            gate: CooldownGate::new(self.settings.cooldown_ms),
            on_event: self.on_event.clone(),
            running: self.running.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("audio-{}", self.device_id))
            .spawn(move || {
                listen_loop(source.as_mut(), ctx);
                drop(done_tx);
            });

        match handle {
            Ok(handle) => {
                self.thread = Some(handle);
                self.done_rx = Some(done_rx);
                self.shutdown = Some(shutdown);
                tracing::info!(device_id = %self.device_id, "Audio listener started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(Error::Io(e))
            }
        }
    }

    /// Mirror of the camera stop: signal, bounded join, then best-effort
    /// release. Release errors are swallowed.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        let exited = match self.done_rx.take() {
            Some(rx) => !matches!(rx.recv_timeout(self.stop_timeout), Err(RecvTimeoutError::Timeout)),
            None => true,
        };

        if exited {
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
            self.shutdown = None;
        } else {
            tracing::warn!(
                device_id = %self.device_id,
                "Listener loop did not stop within timeout, forcing stream release"
            );
            if let Some(force) = self.shutdown.take() {
                force();
            }
            self.thread = None;
        }

        tracing::info!(device_id = %self.device_id, "Audio listener stopped");
    }
}

impl Drop for AudioListener {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ListenContext {
    device_id: String,
    threshold: f32,
    gate: CooldownGate,
    on_event: Option<AudioCallback>,
    running: Arc<AtomicBool>,
}

fn listen_loop(source: &mut dyn SampleSource, mut ctx: ListenContext) {
    while ctx.running.load(Ordering::Acquire) {
        let chunk = match source.read_chunk() {
            Ok(chunk) => chunk,
            Err(CaptureError::Transient(msg)) => {
                tracing::warn!(device_id = %ctx.device_id, error = %msg, "Audio read failed");
                continue;
            }
            Err(CaptureError::Fatal(msg)) => {
                tracing::error!(device_id = %ctx.device_id, error = %msg, "Audio stream lost");
                break;
            }
        };

        let amplitude = normalized_rms(&chunk);
        if amplitude >= ctx.threshold {
            handle_detection(&mut ctx, amplitude);
        }
    }

    ctx.running.store(false, Ordering::Release);
    tracing::debug!(device_id = %ctx.device_id, "Listener loop exited");
}

fn handle_detection(ctx: &mut ListenContext, amplitude: f32) {
    let now_ms = chrono::Utc::now().timestamp_millis();
    if !ctx.gate.accept(now_ms) {
        return;
    }

    let event = AudioEvent {
        timestamp: now_ms,
        amplitude,
        description: describe_amplitude(amplitude).to_string(),
        device_id: ctx.device_id.clone(),
    };

    tracing::info!(
        device_id = %ctx.device_id,
        amplitude = amplitude,
        description = %event.description,
        "Audio event"
    );

    if let Some(callback) = &ctx.on_event {
        callback(event);
    }
}
