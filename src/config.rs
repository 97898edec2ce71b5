use anyhow::{Context, Result};
use serde::Deserialize;

use crate::detection::DEFAULT_WINDOW_SECS;

/// Environment prefix for overrides, e.g. `PLATE_STREAM__RECOGNITION__ENDPOINT`
pub const ENV_PREFIX: &str = "PLATE_STREAM";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub recognition: RecognitionConfig,
    pub history: HistoryConfig,
    pub sampling: SamplingConfig,
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "plate-stream".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
    /// Sessions the API keeps before dropping the oldest stopped ones
    pub retained_sessions: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8090,
            retained_sessions: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// WebSocket endpoint of the recognition service
    pub endpoint: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8000/ws/video".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Base URL of the persisted detection history
    pub base_url: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/history".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Minimum time between two accepted samples
    pub min_interval_ms: u64,
    /// Redraw opportunities per second driving the sampler loop
    pub redraw_hz: u32,
    /// JPEG quality on a 0-1 scale
    pub jpeg_quality: f32,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Decode rate for file-backed video
    pub playback_fps: u32,
    pub ffmpeg_path: String,
    /// ffmpeg input format for cameras (v4l2, avfoundation, dshow)
    pub capture_format: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 150,
            redraw_hz: 60,
            jpeg_quality: 0.8,
            frame_width: 640,
            frame_height: 480,
            playback_fps: 30,
            ffmpeg_path: "ffmpeg".to_string(),
            capture_format: "v4l2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Same-plate suppression window in seconds
    pub window_secs: f64,
    /// Maximum history length for live camera sessions
    pub live_history_cap: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            live_history_cap: 20,
        }
    }
}

impl Config {
    /// Load the optional config file at `path` (extension inferred), then apply
    /// `PLATE_STREAM__*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let cfg = Config::load("does/not/exist/plate-stream").unwrap();

        assert_eq!(cfg.sampling.min_interval_ms, 150);
        assert_eq!(cfg.dedup.window_secs, DEFAULT_WINDOW_SECS);
        assert_eq!(cfg.dedup.live_history_cap, 20);
        assert!(cfg.recognition.endpoint.starts_with("ws://"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[dedup]\nwindow_secs = 1.0\n\n[recognition]\nendpoint = \"ws://10.0.0.5:9000/ws/video\""
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cfg = Config::load(&path).unwrap();

        assert_eq!(cfg.dedup.window_secs, 1.0);
        assert_eq!(cfg.dedup.live_history_cap, 20);
        assert_eq!(cfg.recognition.endpoint, "ws://10.0.0.5:9000/ws/video");
        assert_eq!(cfg.sampling.jpeg_quality, 0.8);
    }
}
