//! AudioEngine - Audio Listener Registry
//!
//! ## Responsibilities
//!
//! - Keyed collection of AudioListeners, one per device id
//! - Start/stop lifecycle, identifier uniqueness
//! - Injects the shared event callback into every listener it creates
//!
//! Callers must install the callback before adding any listener: it only
//! applies to listeners created afterwards.

pub mod capture;
pub mod device;
pub mod listener;

pub use capture::{AudioBackend, AudioDeviceInfo, SampleSource, StreamSpec};
pub use listener::{AudioCallback, AudioEvent, AudioListener, AudioSettings};

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Read-only listener snapshot for the management API
#[derive(Debug, Clone, Serialize)]
pub struct ListenerStatus {
    pub device_id: String,
    pub threshold: f32,
    pub is_running: bool,
}

/// Manages multiple audio listeners and coordinates audio events
pub struct AudioEngine {
    listeners: Mutex<IndexMap<String, AudioListener>>,
    callback: Mutex<Option<AudioCallback>>,
    settings: AudioSettings,
    backend: Arc<dyn AudioBackend>,
}

impl AudioEngine {
    pub fn new(settings: AudioSettings, backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            listeners: Mutex::new(IndexMap::new()),
            callback: Mutex::new(None),
            settings,
            backend,
        }
    }

    /// Install the callback handed to all subsequently created listeners
    pub fn set_event_callback(&self, callback: AudioCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    /// Create and start a new listener. Duplicate ids are rejected without
    /// side effects; a failed start leaves no trace in the registry.
    pub fn add_listener(&self, device_id: &str, device_index: Option<u32>) -> Result<()> {
        let mut listeners = self.listeners.lock().unwrap();

        if listeners.contains_key(device_id) {
            tracing::warn!(device_id = %device_id, "Audio listener already exists");
            return Err(Error::Conflict(format!(
                "audio listener {} already exists",
                device_id
            )));
        }

        let callback = self.callback.lock().unwrap().clone();
        let mut listener = AudioListener::new(
            device_id.to_string(),
            device_index,
            self.settings.clone(),
            self.backend.clone(),
            callback,
        );

        listener.start()?;
        listeners.insert(device_id.to_string(), listener);
        Ok(())
    }

    /// Stop and remove a listener. Idempotent via NotFound.
    pub fn remove_listener(&self, device_id: &str) -> Result<()> {
        let listener = self.listeners.lock().unwrap().shift_remove(device_id);
        match listener {
            Some(mut listener) => {
                listener.stop();
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "audio listener {} not found",
                device_id
            ))),
        }
    }

    /// Snapshot of one listener
    pub fn listener_status(&self, device_id: &str) -> Option<ListenerStatus> {
        self.listeners
            .lock()
            .unwrap()
            .get(device_id)
            .map(|l| ListenerStatus {
                device_id: device_id.to_string(),
                threshold: l.threshold(),
                is_running: l.is_running(),
            })
    }

    /// Snapshot of all listeners, in insertion order
    pub fn all_listeners(&self) -> Vec<ListenerStatus> {
        self.listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(id, l)| ListenerStatus {
                device_id: id.clone(),
                threshold: l.threshold(),
                is_running: l.is_running(),
            })
            .collect()
    }

    /// Number of registered listeners
    pub fn active_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Available input devices, delegated to the backend
    pub fn list_devices(&self) -> Vec<AudioDeviceInfo> {
        self.backend.list_devices()
    }

    /// Stop and clear every listener, tolerating partial failures
    pub fn stop_all(&self) {
        let mut listeners = self.listeners.lock().unwrap();
        for (_, mut listener) in listeners.drain(..) {
            listener.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::capture::CaptureError;

    struct SilentSource;

    impl SampleSource for SilentSource {
        fn read_chunk(&mut self) -> std::result::Result<Vec<i16>, CaptureError> {
            // Stay alive briefly so the listener looks running in tests
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(vec![0; 64])
        }
    }

    struct SilentBackend {
        fail_open: bool,
    }

    impl AudioBackend for SilentBackend {
        fn open(
            &self,
            _device_index: Option<u32>,
            _spec: StreamSpec,
        ) -> std::result::Result<Box<dyn SampleSource>, CaptureError> {
            if self.fail_open {
                return Err(CaptureError::Fatal("unavailable".to_string()));
            }
            Ok(Box::new(SilentSource))
        }

        fn list_devices(&self) -> Vec<AudioDeviceInfo> {
            vec![AudioDeviceInfo {
                index: 0,
                name: "stub mic".to_string(),
                sample_rate: 44100,
            }]
        }
    }

    fn engine() -> AudioEngine {
        AudioEngine::new(
            AudioSettings::default(),
            Arc::new(SilentBackend { fail_open: false }),
        )
    }

    #[test]
    fn test_duplicate_listener_rejected() {
        let engine = engine();
        engine.add_listener("mic-1", None).unwrap();
        assert!(matches!(
            engine.add_listener("mic-1", Some(3)),
            Err(Error::Conflict(_))
        ));
        assert_eq!(engine.active_count(), 1);
        engine.stop_all();
    }

    #[test]
    fn test_remove_listener_idempotent() {
        let engine = engine();
        engine.add_listener("mic-1", None).unwrap();
        assert!(engine.remove_listener("mic-1").is_ok());
        assert!(matches!(
            engine.remove_listener("mic-1"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_failed_start_leaves_no_entry() {
        let engine = AudioEngine::new(
            AudioSettings::default(),
            Arc::new(SilentBackend { fail_open: true }),
        );
        assert!(engine.add_listener("mic-1", None).is_err());
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_status_reports_threshold() {
        let engine = engine();
        engine.add_listener("mic-1", None).unwrap();
        let status = engine.listener_status("mic-1").unwrap();
        assert_eq!(status.device_id, "mic-1");
        assert!((status.threshold - 0.7).abs() < 1e-6);
        assert!(status.is_running);
        engine.stop_all();
    }

    #[test]
    fn test_list_devices_delegates_to_backend() {
        let engine = engine();
        let devices = engine.list_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "stub mic");
    }
}
