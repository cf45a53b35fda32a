//! CameraHandler - one camera, one capture thread
//!
//! ## Responsibilities
//!
//! - Open the capture source and run an isolated capture loop
//! - Frame-skip and confidence/class filtering
//! - Crop + encode qualifying detections and fire the callback
//! - Bounded-wait stop with forced resource release

use crate::error::{Error, Result};
use crate::vision::capture::{
    CaptureError, CaptureSource, Frame, FrameSource, ShutdownHandle, VideoBackend,
};
use crate::vision::detect::{Detection, LazyDetector, ObjectDetector};
use crate::vision::encode::crop_to_jpeg_base64;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long stop() waits for the capture loop to observe the flag
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback fired once per qualifying detection, on the capture thread
pub type DetectionCallback = Arc<dyn Fn(&str, Detection) + Send + Sync>;

/// Per-registry vision tuning
#[derive(Debug, Clone)]
pub struct VisionSettings {
    /// Minimum confidence for a detection to qualify
    pub confidence_threshold: f32,
    /// Class ids that trigger alerts
    pub target_classes: HashSet<u32>,
    /// Process every nth frame (1-based counting)
    pub frame_skip: u32,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            target_classes: HashSet::from([0]),
            frame_skip: 2,
        }
    }
}

/// Manages video capture from one camera source.
/// Frame capture runs in a background thread so callers never block.
pub struct CameraHandler {
    camera_id: String,
    source: CaptureSource,
    settings: VisionSettings,
    backend: Arc<dyn VideoBackend>,
    detector: LazyDetector,
    on_detection: Option<DetectionCallback>,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    done_rx: Option<mpsc::Receiver<()>>,
    shutdown: Option<ShutdownHandle>,
    stop_timeout: Duration,
}

impl CameraHandler {
    pub fn new(
        camera_id: String,
        source: CaptureSource,
        settings: VisionSettings,
        backend: Arc<dyn VideoBackend>,
        detector: LazyDetector,
        on_detection: Option<DetectionCallback>,
    ) -> Self {
        Self {
            camera_id,
            source,
            settings,
            backend,
            detector,
            on_detection,
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

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn source(&self) -> &CaptureSource {
        &self.source
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Open the source and launch the capture thread.
    ///
    /// Idempotent: returns Ok when a loop is already running. A failed open
    /// leaves the handler exactly as it was.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::warn!(camera_id = %self.camera_id, "Camera is already running");
            return Ok(());
        }

        let mut source = self
            .backend
            .open(&self.source)
            .map_err(|e| Error::Capture(format!("failed to open {}: {}", self.source, e)))?;

        let shutdown = source.shutdown_handle();
        let (done_tx, done_rx) = mpsc::channel();

        // Fresh flag per start: a previous loop that was force-released and
        // detached still stores false into its own flag when it exits, which
        // must not touch this run.
        self.running = Arc::new(AtomicBool::new(true));

        let ctx = LoopContext {
            camera_id: self.camera_id.clone(),
            settings: self.settings.clone(),
            detector: self.detector.clone(),
            on_detection: self.on_detection.clone(),
            running: self.running.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("camera-{}", self.camera_id))
            .spawn(move || {
                capture_loop(source.as_mut(), &ctx);
                drop(done_tx);
            });

        match handle {
            Ok(handle) => {
                self.thread = Some(handle);
                self.done_rx = Some(done_rx);
                self.shutdown = Some(shutdown);
                tracing::info!(camera_id = %self.camera_id, source = %self.source, "Camera started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(Error::Io(e))
            }
        }
    }

    /// Signal the loop, wait up to a bounded timeout, then release the
    /// capture resource regardless. Safe to call repeatedly and when never
    /// started.
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
            // The loop did not observe the flag in time. Force the OS
            // resource closed out from under it; the pending read fails
            // and the loop exits on its own. The thread is detached.
            tracing::warn!(
                camera_id = %self.camera_id,
                "Capture loop did not stop within timeout, forcing resource release"
            );
            if let Some(force) = self.shutdown.take() {
                force();
            }
            self.thread = None;
        }

        tracing::info!(camera_id = %self.camera_id, "Camera stopped");
    }
}

impl Drop for CameraHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopContext {
    camera_id: String,
    settings: VisionSettings,
    detector: LazyDetector,
    on_detection: Option<DetectionCallback>,
    running: Arc<AtomicBool>,
}

/// Main capture loop. Runs until stop or an irrecoverable read failure.
fn capture_loop(source: &mut dyn FrameSource, ctx: &LoopContext) {
    // Lazy-load the detector on first use in the loop. Concurrent handlers
    // sharing a LazyDetector converge on a single load.
    let detector = match ctx.detector.get() {
        Ok(detector) => detector,
        Err(e) => {
            tracing::error!(camera_id = %ctx.camera_id, error = %e, "Detector load failed");
            ctx.running.store(false, Ordering::Release);
            return;
        }
    };

    // 0 would mean "process nothing" and panic the modulo; treat it as 1
    let frame_skip = ctx.settings.frame_skip.max(1) as u64;
    let mut frame_count: u64 = 0;

    while ctx.running.load(Ordering::Acquire) {
        let frame = match source.read() {
            Ok(frame) => frame,
            Err(CaptureError::Transient(msg)) => {
                // Network cameras drop frames transiently; not fatal
                tracing::warn!(camera_id = %ctx.camera_id, error = %msg, "Failed to read frame");
                continue;
            }
            Err(CaptureError::Fatal(msg)) => {
                tracing::error!(camera_id = %ctx.camera_id, error = %msg, "Capture source lost");
                break;
            }
        };

        frame_count += 1;

        // Skip frames to bound inference cost
        if frame_count % frame_skip != 0 {
            continue;
        }

        // A single bad frame must never kill the capture thread
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            process_frame(&frame, detector.as_ref(), ctx)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(camera_id = %ctx.camera_id, error = %e, "Error processing frame");
            }
            Err(_) => {
                tracing::error!(camera_id = %ctx.camera_id, "Frame processing panicked");
            }
        }
    }

    ctx.running.store(false, Ordering::Release);
    tracing::debug!(camera_id = %ctx.camera_id, frames = frame_count, "Capture loop exited");
}

/// Run one frame through detection and fire the callback for each
/// qualifying box.
fn process_frame(frame: &Frame, detector: &dyn ObjectDetector, ctx: &LoopContext) -> Result<()> {
    for raw in detector.detect(frame)? {
        if !ctx.settings.target_classes.contains(&raw.class_id)
            || raw.confidence < ctx.settings.confidence_threshold
        {
            continue;
        }

        let cropped_image_base64 = match crop_to_jpeg_base64(frame, &raw.bbox) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(camera_id = %ctx.camera_id, error = %e, "Error encoding crop");
                String::new()
            }
        };

        let detection = Detection {
            class_id: raw.class_id,
            class_name: raw.class_name,
            confidence: raw.confidence,
            bbox: raw.bbox,
            cropped_image_base64,
        };

        tracing::info!(
            camera_id = %ctx.camera_id,
            class_name = %detection.class_name,
            confidence = detection.confidence,
            "Detection"
        );

        if let Some(callback) = &ctx.on_detection {
            callback(&ctx.camera_id, detection);
        }
    }
    Ok(())
}

/// Shared fixtures for registry-level tests
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::vision::detect::{DetectorLoader, RawDetection};

    struct StubSource {
        remaining: usize,
    }

    impl FrameSource for StubSource {
        fn read(&mut self) -> std::result::Result<Frame, CaptureError> {
            if self.remaining == 0 {
                return Err(CaptureError::Fatal("stream ended".to_string()));
            }
            self.remaining -= 1;
            Ok(Frame::new(4, 4, vec![0; 4 * 4 * 3]))
        }
    }

    pub struct StaticBackend {
        frames: usize,
        fail_open: bool,
    }

    impl StaticBackend {
        pub fn new(frames: usize) -> Self {
            Self {
                frames,
                fail_open: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                frames: 0,
                fail_open: true,
            }
        }
    }

    impl VideoBackend for StaticBackend {
        fn open(
            &self,
            _source: &CaptureSource,
        ) -> std::result::Result<Box<dyn FrameSource>, CaptureError> {
            if self.fail_open {
                return Err(CaptureError::Fatal("cannot open source".to_string()));
            }
            Ok(Box::new(StubSource {
                remaining: self.frames,
            }))
        }
    }

    struct NullDetector;

    impl ObjectDetector for NullDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            Ok(Vec::new())
        }
    }

    pub struct NullLoader;

    impl DetectorLoader for NullLoader {
        fn load(&self) -> Result<Arc<dyn ObjectDetector>> {
            Ok(Arc::new(NullDetector))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::detect::{BoundingBox, DetectorLoader, RawDetection};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn test_frame() -> Frame {
        Frame::new(8, 8, vec![128; 8 * 8 * 3])
    }

    /// Serves a fixed number of frames, then reports the source as lost
    struct ScriptedSource {
        remaining: usize,
    }

    impl FrameSource for ScriptedSource {
        fn read(&mut self) -> std::result::Result<Frame, CaptureError> {
            if self.remaining == 0 {
                return Err(CaptureError::Fatal("end of script".to_string()));
            }
            self.remaining -= 1;
            Ok(test_frame())
        }
    }

    struct ScriptedBackend {
        frames: usize,
    }

    impl VideoBackend for ScriptedBackend {
        fn open(
            &self,
            _source: &CaptureSource,
        ) -> std::result::Result<Box<dyn FrameSource>, CaptureError> {
            Ok(Box::new(ScriptedSource {
                remaining: self.frames,
            }))
        }
    }

    /// Counts inference calls and returns one fixed box per frame
    struct CountingDetector {
        calls: Arc<AtomicUsize>,
        confidence: f32,
    }

    impl ObjectDetector for CountingDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RawDetection {
                class_id: 0,
                class_name: "person".to_string(),
                confidence: self.confidence,
                bbox: BoundingBox {
                    x1: 1,
                    y1: 1,
                    x2: 5,
                    y2: 5,
                },
            }])
        }
    }

    struct FixedLoader {
        calls: Arc<AtomicUsize>,
        confidence: f32,
    }

    impl DetectorLoader for FixedLoader {
        fn load(&self) -> Result<Arc<dyn ObjectDetector>> {
            Ok(Arc::new(CountingDetector {
                calls: self.calls.clone(),
                confidence: self.confidence,
            }))
        }
    }

    fn handler_with(
        frames: usize,
        detector_confidence: f32,
        settings: VisionSettings,
        calls: Arc<AtomicUsize>,
        callback: Option<DetectionCallback>,
    ) -> CameraHandler {
        CameraHandler::new(
            "cam-test".to_string(),
            CaptureSource::DeviceIndex(0),
            settings,
            Arc::new(ScriptedBackend { frames }),
            LazyDetector::new(Arc::new(FixedLoader {
                calls,
                confidence: detector_confidence,
            })),
            callback,
        )
    }

    fn wait_until_stopped(handler: &CameraHandler) {
        for _ in 0..200 {
            if !handler.is_running() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("capture loop did not finish");
    }

    #[test]
    fn test_frame_skip_bounds_inference() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handler = handler_with(5, 0.9, VisionSettings::default(), calls.clone(), None);

        handler.start().unwrap();
        wait_until_stopped(&handler);
        handler.stop();

        // frame_skip=2 over 5 frames: inference on frames 2 and 4 only
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_frame_skip_processes_every_frame() {
        let calls = Arc::new(AtomicUsize::new(0));
        let settings = VisionSettings {
            frame_skip: 0,
            ..Default::default()
        };
        let mut handler = handler_with(3, 0.4, settings, calls.clone(), None);

        handler.start().unwrap();
        wait_until_stopped(&handler);
        handler.stop();

        // Treated as every-frame: the loop survives and all 3 frames reach
        // inference instead of the first one panicking the thread
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!handler.is_running());
    }

    /// Blocks in read until its shutdown handle closes the stream
    struct BlockingSource {
        rx: mpsc::Receiver<()>,
        tx: Option<mpsc::Sender<()>>,
        released: Arc<AtomicBool>,
    }

    impl FrameSource for BlockingSource {
        fn read(&mut self) -> std::result::Result<Frame, CaptureError> {
            match self.rx.recv() {
                Ok(()) => Ok(test_frame()),
                Err(_) => Err(CaptureError::Fatal("stream closed".to_string())),
            }
        }

        fn shutdown_handle(&mut self) -> ShutdownHandle {
            let tx = self.tx.take();
            let released = self.released.clone();
            Box::new(move || {
                released.store(true, Ordering::SeqCst);
                drop(tx);
            })
        }
    }

    struct BlockingBackend {
        released: Arc<AtomicBool>,
    }

    impl VideoBackend for BlockingBackend {
        fn open(
            &self,
            _source: &CaptureSource,
        ) -> std::result::Result<Box<dyn FrameSource>, CaptureError> {
            let (tx, rx) = mpsc::channel();
            Ok(Box::new(BlockingSource {
                rx,
                tx: Some(tx),
                released: self.released.clone(),
            }))
        }
    }

    fn blocking_handler(released: Arc<AtomicBool>) -> CameraHandler {
        let mut handler = CameraHandler::new(
            "cam-blocked".to_string(),
            CaptureSource::DeviceIndex(0),
            VisionSettings::default(),
            Arc::new(BlockingBackend { released }),
            LazyDetector::new(Arc::new(FixedLoader {
                calls: Arc::new(AtomicUsize::new(0)),
                confidence: 0.9,
            })),
            None,
        );
        handler.set_stop_timeout(Duration::from_millis(100));
        handler
    }

    #[test]
    fn test_stop_forces_release_of_blocked_read() {
        let released = Arc::new(AtomicBool::new(false));
        let mut handler = blocking_handler(released.clone());

        handler.start().unwrap();
        assert!(handler.is_running());

        let begun = std::time::Instant::now();
        handler.stop();

        // The loop never observed the flag, so stop released the resource
        // out from under the blocked read and returned within the bound
        assert!(released.load(Ordering::SeqCst));
        assert!(begun.elapsed() < STOP_JOIN_TIMEOUT);
    }

    #[test]
    fn test_restart_after_forced_release_stays_running() {
        let released = Arc::new(AtomicBool::new(false));
        let mut handler = blocking_handler(released.clone());

        handler.start().unwrap();
        handler.stop();
        assert!(released.load(Ordering::SeqCst));

        handler.start().unwrap();
        // The detached first loop exits once its read fails; that exit must
        // not flip the restarted handler's flag
        thread::sleep(Duration::from_millis(300));
        assert!(handler.is_running());
        handler.stop();
    }

    #[test]
    fn test_callback_fires_for_qualifying_detection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen: Arc<Mutex<Vec<(String, Detection)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: DetectionCallback = Arc::new(move |camera_id, detection| {
            sink.lock().unwrap().push((camera_id.to_string(), detection));
        });

        let mut handler = handler_with(
            2,
            0.95,
            VisionSettings::default(),
            calls,
            Some(callback),
        );
        handler.start().unwrap();
        wait_until_stopped(&handler);
        handler.stop();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "cam-test");
        assert_eq!(seen[0].1.class_name, "person");
        assert!(!seen[0].1.cropped_image_base64.is_empty());
    }

    #[test]
    fn test_low_confidence_detection_is_filtered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let callback: DetectionCallback = Arc::new(move |_, _| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        // Detector confidence 0.4 is below the 0.6 threshold
        let mut handler = handler_with(4, 0.4, VisionSettings::default(), calls, Some(callback));
        handler.start().unwrap();
        wait_until_stopped(&handler);
        handler.stop();

        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    struct FailingBackend;

    impl VideoBackend for FailingBackend {
        fn open(
            &self,
            _source: &CaptureSource,
        ) -> std::result::Result<Box<dyn FrameSource>, CaptureError> {
            Err(CaptureError::Fatal("no such device".to_string()))
        }
    }

    #[test]
    fn test_start_fails_when_source_cannot_open() {
        let mut handler = CameraHandler::new(
            "cam-bad".to_string(),
            CaptureSource::DeviceIndex(99),
            VisionSettings::default(),
            Arc::new(FailingBackend),
            LazyDetector::new(Arc::new(FixedLoader {
                calls: Arc::new(AtomicUsize::new(0)),
                confidence: 0.9,
            })),
            None,
        );

        assert!(handler.start().is_err());
        assert!(!handler.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handler = handler_with(1, 0.9, VisionSettings::default(), calls, None);

        handler.start().unwrap();
        handler.stop();
        let was_running = handler.is_running();
        handler.stop();

        assert!(!was_running);
        assert!(!handler.is_running());
    }

    #[test]
    fn test_stop_without_start_is_safe() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handler = handler_with(1, 0.9, VisionSettings::default(), calls, None);
        handler.stop();
        assert!(!handler.is_running());
    }
}
