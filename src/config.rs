//! Engine configuration
//!
//! All values come from environment variables with sane defaults.
//! Load `.env` (dotenvy) before constructing `EngineConfig`.

use std::collections::HashSet;

/// Application configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Management server base URL (alert destination)
    pub backend_url: String,
    /// Static API key sent as X-API-KEY on every outbound request
    pub api_key: String,
    /// Remote object-detection service base URL
    pub detector_url: String,
    /// Minimum confidence for a detection to qualify
    pub detection_confidence: f32,
    /// Class ids the vision pipeline alerts on
    pub target_classes: Vec<u32>,
    /// Process every nth frame (1-based, `count % frame_skip == 0`)
    pub frame_skip: u32,
    /// Normalized RMS amplitude threshold for audio events
    pub audio_threshold: f32,
    /// Audio capture sample rate in Hz
    pub audio_sample_rate: u32,
    /// Samples per audio chunk
    pub audio_chunk_size: usize,
    /// Minimum interval between accepted audio events per device
    pub audio_cooldown_ms: i64,
    /// Camera added as "default" at startup, if set
    pub default_camera_url: Option<String>,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_url: std::env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://management-server:8080".to_string()),
            api_key: std::env::var("AI_API_KEY")
                .unwrap_or_else(|_| "changeme-api-key".to_string()),
            detector_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            detection_confidence: env_parse("DETECTION_CONFIDENCE", 0.6),
            target_classes: std::env::var("TARGET_CLASSES")
                .ok()
                .map(|v| parse_target_classes(&v))
                .unwrap_or_else(|| vec![0]),
            // A zero interval would disable frame processing entirely
            frame_skip: env_parse("FRAME_SKIP", 2).max(1),
            audio_threshold: env_parse("AUDIO_THRESHOLD", 0.7),
            audio_sample_rate: env_parse("AUDIO_SAMPLE_RATE", 44100),
            audio_chunk_size: env_parse("AUDIO_CHUNK_SIZE", 1024),
            audio_cooldown_ms: env_parse("AUDIO_COOLDOWN_MS", 2000),
            default_camera_url: std::env::var("DEFAULT_CAMERA_URL").ok(),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8000),
        }
    }
}

impl EngineConfig {
    /// Target classes as a lookup set
    pub fn target_class_set(&self) -> HashSet<u32> {
        self.target_classes.iter().copied().collect()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated class id list, ignoring malformed entries
fn parse_target_classes(raw: &str) -> Vec<u32> {
    raw.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_frame_skip_is_clamped() {
        std::env::set_var("FRAME_SKIP", "0");
        let config = EngineConfig::default();
        std::env::remove_var("FRAME_SKIP");
        assert_eq!(config.frame_skip, 1);
    }

    #[test]
    fn test_parse_target_classes() {
        assert_eq!(parse_target_classes("0"), vec![0]);
        assert_eq!(parse_target_classes("0, 2, 15"), vec![0, 2, 15]);
        assert_eq!(parse_target_classes("0,bad,3"), vec![0, 3]);
        assert!(parse_target_classes("").is_empty());
    }
}
