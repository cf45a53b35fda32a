//! Sentry AI Engine Library
//!
//! Real-time security monitoring: visual object detection and audio
//! anomaly detection with alert dispatch to the management backend.
//!
//! ## Architecture (6 Components)
//!
//! 1. VisionEngine - Camera registry and per-camera capture/detection threads
//! 2. AudioEngine - Audio listener registry with RMS anomaly detection
//! 3. ServiceConnector - Alert delivery to the backend (best-effort HTTP)
//! 4. AlertDispatcher - Capture-thread to async hand-off
//! 5. WebAPI - REST management endpoints
//! 6. EngineConfig - Environment-driven configuration
//!
//! ## Design Principles
//!
//! - Capture is isolated per device: one thread per camera/microphone
//! - Detection failures never take down a capture thread
//! - Alert delivery is best-effort and never blocks capture

pub mod audio;
pub mod config;
pub mod connector;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod state;
pub mod vision;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
