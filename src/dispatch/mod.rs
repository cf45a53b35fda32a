//! AlertDispatcher - capture-thread to async hand-off
//!
//! ## Responsibilities
//!
//! - Marshal detection/audio events from capture threads onto the tokio
//!   runtime without blocking the capture thread
//! - Build alert descriptions and deliver them via ServiceConnector
//!
//! Capture threads only ever touch the unbounded sender; each event becomes
//! its own delivery task, so nothing serializes deliveries (two events from
//! one device may complete out of order).

use crate::audio::AudioCallback;
use crate::audio::AudioEvent;
use crate::connector::{AlertKind, ServiceConnector};
use crate::vision::{Detection, DetectionCallback};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event crossing from a capture thread into the async context
#[derive(Debug)]
pub enum EngineEvent {
    Detection {
        camera_id: String,
        detection: Detection,
    },
    Audio(AudioEvent),
}

/// Routes engine events to the alert connector
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl AlertDispatcher {
    /// Spawn the drain task on the current tokio runtime
    pub fn start(connector: Arc<ServiceConnector>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let connector = connector.clone();
                tokio::spawn(async move {
                    deliver(&connector, event).await;
                });
            }
            tracing::debug!("Alert dispatcher drained");
        });

        Self { tx }
    }

    /// Submit an event. Non-blocking; callable from any thread.
    pub fn dispatch(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Alert dispatcher is shut down, event dropped");
        }
    }

    /// Callback for VisionEngine, fired on camera capture threads
    pub fn detection_callback(&self) -> DetectionCallback {
        let dispatcher = self.clone();
        Arc::new(move |camera_id: &str, detection: Detection| {
            dispatcher.dispatch(EngineEvent::Detection {
                camera_id: camera_id.to_string(),
                detection,
            });
        })
    }

    /// Callback for AudioEngine, fired on listener threads
    pub fn audio_callback(&self) -> AudioCallback {
        let dispatcher = self.clone();
        Arc::new(move |event: AudioEvent| {
            dispatcher.dispatch(EngineEvent::Audio(event));
        })
    }
}

async fn deliver(connector: &ServiceConnector, event: EngineEvent) {
    match event {
        EngineEvent::Detection {
            camera_id,
            detection,
        } => {
            let description = describe_detection(&detection);
            connector
                .send_alert(
                    &camera_id,
                    AlertKind::Visual,
                    &description,
                    &detection.cropped_image_base64,
                    None,
                )
                .await;
        }
        EngineEvent::Audio(event) => {
            connector
                .send_alert(
                    &event.device_id,
                    AlertKind::Audio,
                    &event.description,
                    "",
                    Some(event.timestamp),
                )
                .await;
        }
    }
}

/// "Person detected with 87.3% confidence"
fn describe_detection(detection: &Detection) -> String {
    format!(
        "{} detected with {:.1}% confidence",
        capitalize(&detection.class_name),
        detection.confidence * 100.0
    )
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::detect::BoundingBox;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Mutex;
    use std::time::Duration;

    fn detection(class_name: &str, confidence: f32) -> Detection {
        Detection {
            class_id: 0,
            class_name: class_name.to_string(),
            confidence,
            bbox: BoundingBox {
                x1: 0,
                y1: 0,
                x2: 4,
                y2: 4,
            },
            cropped_image_base64: "aW1n".to_string(),
        }
    }

    #[test]
    fn test_describe_detection() {
        assert_eq!(
            describe_detection(&detection("person", 0.873)),
            "Person detected with 87.3% confidence"
        );
        assert_eq!(
            describe_detection(&detection("dog", 0.6)),
            "Dog detected with 60.0% confidence"
        );
    }

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn alert_sink() -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new()
            .route(
                "/api/v1/alerts",
                post(
                    |State(received): State<Received>, Json(body): Json<serde_json::Value>| async move {
                        received.lock().unwrap().push(body);
                        axum::http::StatusCode::CREATED
                    },
                ),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}", addr), received)
    }

    async fn wait_for_alerts(received: &Received, count: usize) {
        for _ in 0..100 {
            if received.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {} alerts, got {:?}", count, received.lock().unwrap());
    }

    #[tokio::test]
    async fn test_detection_event_reaches_backend() {
        let (base, received) = alert_sink().await;
        let connector = Arc::new(ServiceConnector::new(base, "key".to_string()));
        let dispatcher = AlertDispatcher::start(connector);

        // Fire the callback from a plain OS thread, like a capture loop does
        let callback = dispatcher.detection_callback();
        std::thread::spawn(move || {
            callback("cam-7", detection("person", 0.91));
        })
        .join()
        .unwrap();

        wait_for_alerts(&received, 1).await;
        let alerts = received.lock().unwrap();
        assert_eq!(alerts[0]["cameraId"], "cam-7");
        assert_eq!(alerts[0]["alertType"], "VISUAL");
        assert_eq!(
            alerts[0]["description"],
            "Person detected with 91.0% confidence"
        );
        assert_eq!(alerts[0]["imageBase64"], "aW1n");
    }

    #[tokio::test]
    async fn test_audio_event_keeps_its_timestamp() {
        let (base, received) = alert_sink().await;
        let connector = Arc::new(ServiceConnector::new(base, "key".to_string()));
        let dispatcher = AlertDispatcher::start(connector);

        let callback = dispatcher.audio_callback();
        callback(AudioEvent {
            timestamp: 1_700_000_000_123,
            amplitude: 0.95,
            description: "Loud noise detected - possible scream or alarm".to_string(),
            device_id: "mic-1".to_string(),
        });

        wait_for_alerts(&received, 1).await;
        let alerts = received.lock().unwrap();
        assert_eq!(alerts[0]["cameraId"], "mic-1");
        assert_eq!(alerts[0]["alertType"], "AUDIO");
        assert_eq!(alerts[0]["timestamp"], 1_700_000_000_123i64);
        assert_eq!(alerts[0]["imageBase64"], "");
    }
}
