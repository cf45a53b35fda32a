//! API Routes

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use std::str::FromStr;

use crate::audio::ListenerStatus;
use crate::error::{Error, Result};
use crate::models::{ApiResponse, AudioDeviceRequest, CameraRequest, StatusResponse};
use crate::state::AppState;
use crate::vision::{CameraStatus, CaptureSource};

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/", get(super::root))
        .route("/health", get(super::health_check))
        // Cameras
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras", post(add_camera))
        .route("/api/cameras/:id", get(get_camera))
        .route("/api/cameras/:id", delete(remove_camera))
        // Audio
        .route("/api/audio/devices", get(list_audio_devices))
        .route("/api/audio/listeners", get(list_audio_listeners))
        .route("/api/audio/listeners", post(add_audio_listener))
        .route("/api/audio/listeners/:device_id", delete(remove_audio_listener))
        .with_state(state)
}

/// List all registered cameras
async fn list_cameras(State(state): State<AppState>) -> Json<ApiResponse<Vec<CameraStatus>>> {
    Json(ApiResponse::success(state.vision.all_cameras()))
}

/// Get one camera's status
async fn get_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<CameraStatus>>> {
    let status = state
        .vision
        .camera_status(&id)
        .ok_or_else(|| Error::NotFound(format!("camera {} not found", id)))?;
    Ok(Json(ApiResponse::success(status)))
}

/// Register a camera and start its capture thread
async fn add_camera(
    State(state): State<AppState>,
    Json(req): Json<CameraRequest>,
) -> Result<Json<StatusResponse>> {
    if req.camera_id.trim().is_empty() {
        return Err(Error::Validation("camera_id must not be empty".to_string()));
    }
    let source = CaptureSource::from_str(&req.source)
        .map_err(|_| Error::Validation("invalid capture source".to_string()))?;

    let vision = state.vision.clone();
    let camera_id = req.camera_id.clone();
    // add_camera blocks on process spawn + first frame
    tokio::task::spawn_blocking(move || vision.add_camera(&camera_id, source))
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;

    Ok(Json(StatusResponse {
        success: true,
        message: format!("Camera {} started", req.camera_id),
    }))
}

/// Stop and unregister a camera
async fn remove_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let vision = state.vision.clone();
    let camera_id = id.clone();
    // remove_camera may block up to the stop-join timeout
    tokio::task::spawn_blocking(move || vision.remove_camera(&camera_id))
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;

    Ok(Json(StatusResponse {
        success: true,
        message: format!("Camera {} stopped", id),
    }))
}

/// Enumerate capture-capable audio input devices
async fn list_audio_devices(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<crate::audio::AudioDeviceInfo>>>> {
    let audio = state.audio.clone();
    let devices = tokio::task::spawn_blocking(move || audio.list_devices())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(Json(ApiResponse::success(devices)))
}

/// List all registered audio listeners
async fn list_audio_listeners(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ListenerStatus>>> {
    Json(ApiResponse::success(state.audio.all_listeners()))
}

/// Register an audio listener and start its capture thread
async fn add_audio_listener(
    State(state): State<AppState>,
    Json(req): Json<AudioDeviceRequest>,
) -> Result<Json<StatusResponse>> {
    if req.device_id.trim().is_empty() {
        return Err(Error::Validation("device_id must not be empty".to_string()));
    }

    let audio = state.audio.clone();
    let device_id = req.device_id.clone();
    tokio::task::spawn_blocking(move || audio.add_listener(&device_id, req.device_index))
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;

    Ok(Json(StatusResponse {
        success: true,
        message: format!("Audio listener {} started", req.device_id),
    }))
}

/// Stop and unregister an audio listener
async fn remove_audio_listener(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let audio = state.audio.clone();
    let id = device_id.clone();
    tokio::task::spawn_blocking(move || audio.remove_listener(&id))
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;

    Ok(Json(StatusResponse {
        success: true,
        message: format!("Audio listener {} stopped", device_id),
    }))
}
