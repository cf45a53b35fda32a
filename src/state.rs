//! Shared application state

use crate::audio::AudioEngine;
use crate::config::EngineConfig;
use crate::connector::ServiceConnector;
use crate::vision::VisionEngine;
use std::sync::Arc;

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: EngineConfig,
    pub vision: Arc<VisionEngine>,
    pub audio: Arc<AudioEngine>,
    pub connector: Arc<ServiceConnector>,
}

impl AppState {
    pub fn new(
        config: EngineConfig,
        vision: Arc<VisionEngine>,
        audio: Arc<AudioEngine>,
        connector: Arc<ServiceConnector>,
    ) -> Self {
        Self {
            config,
            vision,
            audio,
            connector,
        }
    }
}
