//! RemoteDetector - inference service adapter
//!
//! ## Responsibilities
//!
//! - Send frames to the detection service and parse raw boxes
//! - Verify the service is reachable at load time
//!
//! Runs on capture threads, so it uses the blocking reqwest client; inference
//! latency blocks only the owning capture thread, never the async context.

use crate::error::{Error, Result};
use crate::vision::capture::Frame;
use crate::vision::detect::{BoundingBox, DetectorLoader, ObjectDetector, RawDetection};
use image::codecs::jpeg::JpegEncoder;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Wire shape of one detection from the service
#[derive(Debug, Deserialize)]
struct WireBox {
    class_id: u32,
    label: String,
    conf: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireBox>,
}

/// Synchronous HTTP adapter for the object-detection service
pub struct RemoteDetector {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl RemoteDetector {
    fn new(base_url: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, base_url })
    }
}

impl ObjectDetector for RemoteDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 85)
            .encode(&frame.pixels, frame.width, frame.height, image::ColorType::Rgb8)
            .map_err(|e| Error::Internal(format!("frame encode failed: {}", e)))?;

        let part = reqwest::blocking::multipart::Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::blocking::multipart::Form::new().part("infer_image", part);

        let url = format!("{}/v1/detect", self.base_url);
        let resp = self.client.post(&url).multipart(form).send()?;

        if !resp.status().is_success() {
            return Err(Error::Detector(format!(
                "inference failed: {}",
                resp.status()
            )));
        }

        let body: DetectResponse = resp.json()?;
        Ok(body
            .detections
            .into_iter()
            .map(|b| RawDetection {
                class_id: b.class_id,
                class_name: b.label,
                confidence: b.conf,
                bbox: BoundingBox {
                    x1: b.x1 as i32,
                    y1: b.y1 as i32,
                    x2: b.x2 as i32,
                    y2: b.y2 as i32,
                },
            })
            .collect())
    }
}

/// Loads a RemoteDetector after checking the service is up
pub struct RemoteDetectorLoader {
    base_url: String,
}

impl RemoteDetectorLoader {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

impl DetectorLoader for RemoteDetectorLoader {
    fn load(&self) -> Result<Arc<dyn ObjectDetector>> {
        let detector = RemoteDetector::new(self.base_url.clone())?;

        let url = format!("{}/healthz", detector.base_url);
        match detector.client.get(&url).send() {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(detector_url = %self.base_url, "Detector service ready");
            }
            Ok(resp) => {
                return Err(Error::Detector(format!(
                    "detector service unhealthy: {}",
                    resp.status()
                )));
            }
            Err(e) => {
                return Err(Error::Detector(format!(
                    "detector service unreachable: {}",
                    e
                )));
            }
        }

        Ok(Arc::new(detector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_response_parsing() {
        let json = r#"{
            "detections": [
                {"class_id": 0, "label": "person", "conf": 0.87,
                 "x1": 10.2, "y1": 4.9, "x2": 120.0, "y2": 230.5}
            ]
        }"#;
        let resp: DetectResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.detections.len(), 1);
        assert_eq!(resp.detections[0].label, "person");

        let empty: DetectResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.detections.is_empty());
    }
}
