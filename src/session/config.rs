use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::media::{SamplerConfig, SourceKind};
use crate::render::RenderPolicy;

/// Configuration for a streaming session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "live-6f1c...")
    pub session_id: String,

    /// Kind of source this session streams from
    pub kind: SourceKind,

    /// Recognition service WebSocket URL
    pub endpoint: String,

    /// Sampler loop timing
    pub sampler: SamplerConfig,

    /// JPEG quality on a 0-1 scale
    pub jpeg_quality: f32,

    /// Same-plate suppression window in seconds
    pub dedup_window_secs: f64,

    /// History cap (live camera only); `None` keeps everything
    pub history_cap: Option<usize>,

    /// Render order policy for annotated frames
    pub render_policy: RenderPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default(), SourceKind::Camera)
    }
}

impl SessionConfig {
    pub fn from_config(cfg: &Config, kind: SourceKind) -> Self {
        let history_cap = match kind {
            SourceKind::Camera if cfg.dedup.live_history_cap > 0 => {
                Some(cfg.dedup.live_history_cap)
            }
            _ => None,
        };

        Self {
            session_id: new_session_id(kind),
            kind,
            endpoint: cfg.recognition.endpoint.clone(),
            sampler: SamplerConfig::from(&cfg.sampling),
            jpeg_quality: cfg.sampling.jpeg_quality,
            dedup_window_secs: cfg.dedup.window_secs,
            history_cap,
            render_policy: RenderPolicy::default(),
        }
    }
}

/// Session id prefixed with the source kind
pub fn new_session_id(kind: SourceKind) -> String {
    let prefix = match kind {
        SourceKind::Camera => "live",
        SourceKind::File => "video",
    };
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

/// Serializable view of the session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Live,
    Video,
}

impl From<SourceKind> for SessionMode {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Camera => SessionMode::Live,
            SourceKind::File => SessionMode::Video,
        }
    }
}
