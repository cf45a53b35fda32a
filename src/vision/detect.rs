//! Detection types and the object-detector seam
//!
//! Inference is an external collaborator: the capture loop hands it a frame
//! and gets back raw boxes. The detector is loaded lazily on first use
//! inside the capture loop, check-lock-check so concurrent first use from
//! racing threads converges on a single instance.

use crate::error::{Error, Result};
use crate::vision::capture::Frame;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, OnceLock};

/// Axis-aligned bounding box in pixel coordinates, x1 < x2, y1 < y2
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Raw box as produced by the inference collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A qualifying detection, ready for alert dispatch
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Base64 JPEG crop of the detected region
    pub cropped_image_base64: String,
}

/// Inference collaborator: frame in, raw boxes out
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>>;
}

/// Constructs the detector. Called at most once per handler.
pub trait DetectorLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn ObjectDetector>>;
}

/// Lazily loaded detector shared by a handler across restarts.
///
/// Fast path reads the cell without locking; the construction mutex only
/// guards the single load.
#[derive(Clone)]
pub struct LazyDetector {
    loader: Arc<dyn DetectorLoader>,
    cell: Arc<OnceLock<Arc<dyn ObjectDetector>>>,
    init: Arc<Mutex<()>>,
}

impl LazyDetector {
    pub fn new(loader: Arc<dyn DetectorLoader>) -> Self {
        Self {
            loader,
            cell: Arc::new(OnceLock::new()),
            init: Arc::new(Mutex::new(())),
        }
    }

    /// Get the detector, loading it on first use
    pub fn get(&self) -> Result<Arc<dyn ObjectDetector>> {
        if let Some(detector) = self.cell.get() {
            return Ok(detector.clone());
        }

        let _guard = self
            .init
            .lock()
            .map_err(|_| Error::Internal("detector init lock poisoned".to_string()))?;

        if let Some(detector) = self.cell.get() {
            return Ok(detector.clone());
        }

        tracing::info!("Loading object detector");
        let detector = self.loader.load()?;
        let _ = self.cell.set(detector.clone());
        Ok(detector)
    }
}
