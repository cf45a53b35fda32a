//! VisionEngine - Camera Handler Registry
//!
//! ## Responsibilities
//!
//! - Keyed collection of CameraHandlers, one per camera id
//! - Start/stop lifecycle, identifier uniqueness
//! - Injects the shared detection callback into every handler it creates
//!
//! Callers must install the callback before adding any camera: it only
//! applies to handlers created afterwards.

pub mod camera;
pub mod capture;
pub mod detect;
pub mod encode;
pub mod ffmpeg;
pub mod remote;

pub use camera::{CameraHandler, DetectionCallback, VisionSettings};
pub use capture::{CaptureError, CaptureSource, Frame, FrameSource, VideoBackend};
pub use detect::{BoundingBox, Detection, DetectorLoader, LazyDetector, ObjectDetector, RawDetection};

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Read-only camera snapshot for the management API
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub camera_id: String,
    pub source: String,
    pub is_running: bool,
}

/// Manages multiple camera handlers and coordinates detection events
pub struct VisionEngine {
    cameras: Mutex<IndexMap<String, CameraHandler>>,
    callback: Mutex<Option<DetectionCallback>>,
    settings: VisionSettings,
    backend: Arc<dyn VideoBackend>,
    loader: Arc<dyn DetectorLoader>,
}

impl VisionEngine {
    pub fn new(
        settings: VisionSettings,
        backend: Arc<dyn VideoBackend>,
        loader: Arc<dyn DetectorLoader>,
    ) -> Self {
        Self {
            cameras: Mutex::new(IndexMap::new()),
            callback: Mutex::new(None),
            settings,
            backend,
            loader,
        }
    }

    /// Install the callback handed to all subsequently created handlers.
    /// Already-running handlers are not rewired.
    pub fn set_detection_callback(&self, callback: DetectionCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    /// Create and start a new camera handler.
    ///
    /// Duplicate ids are rejected without side effects; a failed start
    /// leaves no trace in the registry.
    pub fn add_camera(&self, camera_id: &str, source: CaptureSource) -> Result<()> {
        let mut cameras = self.cameras.lock().unwrap();

        if cameras.contains_key(camera_id) {
            tracing::warn!(camera_id = %camera_id, "Camera already exists");
            return Err(Error::Conflict(format!("camera {} already exists", camera_id)));
        }

        let callback = self.callback.lock().unwrap().clone();
        let mut handler = CameraHandler::new(
            camera_id.to_string(),
            source,
            self.settings.clone(),
            self.backend.clone(),
            LazyDetector::new(self.loader.clone()),
            callback,
        );

        handler.start()?;
        cameras.insert(camera_id.to_string(), handler);
        Ok(())
    }

    /// Stop and remove a camera. Idempotent via NotFound.
    pub fn remove_camera(&self, camera_id: &str) -> Result<()> {
        let handler = self.cameras.lock().unwrap().shift_remove(camera_id);
        match handler {
            Some(mut handler) => {
                handler.stop();
                Ok(())
            }
            None => Err(Error::NotFound(format!("camera {} not found", camera_id))),
        }
    }

    /// Snapshot of one camera
    pub fn camera_status(&self, camera_id: &str) -> Option<CameraStatus> {
        self.cameras.lock().unwrap().get(camera_id).map(|h| CameraStatus {
            camera_id: camera_id.to_string(),
            source: h.source().to_string(),
            is_running: h.is_running(),
        })
    }

    /// Snapshot of all cameras, in insertion order
    pub fn all_cameras(&self) -> Vec<CameraStatus> {
        self.cameras
            .lock()
            .unwrap()
            .iter()
            .map(|(id, h)| CameraStatus {
                camera_id: id.clone(),
                source: h.source().to_string(),
                is_running: h.is_running(),
            })
            .collect()
    }

    /// Number of registered cameras
    pub fn active_count(&self) -> usize {
        self.cameras.lock().unwrap().len()
    }

    /// Stop and clear every handler. Individual stop failures never abort
    /// the sweep (each handler swallows its own release errors).
    pub fn stop_all(&self) {
        let mut cameras = self.cameras.lock().unwrap();
        for (_, mut handler) in cameras.drain(..) {
            handler.stop();
        }
    }
}
