//! Sentry AI Engine - Detection & Alert Dispatch
//!
//! Main entry point for the detection engine.

use sentry_ai_engine::{
    audio::{AudioEngine, AudioSettings},
    audio::capture::StreamSpec,
    audio::device::CpalBackend,
    config::EngineConfig,
    connector::ServiceConnector,
    dispatch::AlertDispatcher,
    state::AppState,
    vision::ffmpeg::FfmpegBackend,
    vision::remote::RemoteDetectorLoader,
    vision::{CaptureSource, VisionEngine, VisionSettings},
    web_api,
};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentry_ai_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sentry AI Engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = EngineConfig::default();
    tracing::info!(
        backend_url = %config.backend_url,
        detector_url = %config.detector_url,
        detection_confidence = config.detection_confidence,
        frame_skip = config.frame_skip,
        audio_threshold = config.audio_threshold,
        "Configuration loaded"
    );

    // Initialize components
    let connector = Arc::new(ServiceConnector::new(
        config.backend_url.clone(),
        config.api_key.clone(),
    ));
    if connector.health_check().await {
        tracing::info!("Backend reachable");
    } else {
        tracing::warn!(backend_url = %config.backend_url, "Backend not reachable, delivery is attempted per-event, best-effort");
    }

    let dispatcher = AlertDispatcher::start(connector.clone());

    let vision = Arc::new(VisionEngine::new(
        VisionSettings {
            confidence_threshold: config.detection_confidence,
            target_classes: config.target_class_set(),
            frame_skip: config.frame_skip,
        },
        Arc::new(FfmpegBackend::new()),
        Arc::new(RemoteDetectorLoader::new(config.detector_url.clone())),
    ));
    let audio = Arc::new(AudioEngine::new(
        AudioSettings {
            threshold: config.audio_threshold,
            spec: StreamSpec {
                sample_rate: config.audio_sample_rate,
                chunk_size: config.audio_chunk_size,
            },
            cooldown_ms: config.audio_cooldown_ms,
        },
        Arc::new(CpalBackend::new()),
    ));

    // Callbacks must be installed before any device is registered
    vision.set_detection_callback(dispatcher.detection_callback());
    audio.set_event_callback(dispatcher.audio_callback());
    tracing::info!("VisionEngine and AudioEngine initialized");

    // Bootstrap the default camera, if configured
    if let Some(url) = &config.default_camera_url {
        let source = CaptureSource::from_str(url).unwrap_or_else(|e| match e {});
        let vision = vision.clone();
        let result =
            tokio::task::spawn_blocking(move || vision.add_camera("default", source)).await?;
        match result {
            Ok(()) => tracing::info!(source = %url, "Default camera started"),
            Err(e) => tracing::warn!(source = %url, error = %e, "Default camera failed to start"),
        }
    }

    let state = AppState::new(config.clone(), vision.clone(), audio.clone(), connector.clone());

    // Build router
    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Release capture resources before exit
    tokio::task::spawn_blocking(move || {
        vision.stop_all();
        audio.stop_all();
    })
    .await?;
    connector.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}
