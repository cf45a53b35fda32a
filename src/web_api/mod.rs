//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes for camera and audio listener management
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let backend_ok = state.connector.health_check().await;

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend_connected: backend_ok,
        cameras_active: state.vision.active_count(),
        audio_listeners_active: state.audio.active_count(),
    };

    Json(response)
}

/// Root banner
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "sentry-ai-engine",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}
