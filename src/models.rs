//! Shared request/response models for the management API

use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend_connected: bool,
    pub cameras_active: usize,
    pub audio_listeners_active: usize,
}

/// Generic success/failure response for add/remove operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

/// Request body for adding a camera
#[derive(Debug, Clone, Deserialize)]
pub struct CameraRequest {
    pub camera_id: String,
    /// URL, file path, or device index as string
    pub source: String,
}

/// Request body for adding an audio listener
#[derive(Debug, Clone, Deserialize)]
pub struct AudioDeviceRequest {
    pub device_id: String,
    pub device_index: Option<u32>,
}
