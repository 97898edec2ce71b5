use chrono::{DateTime, Utc};
use serde::Serialize;

use super::config::SessionMode;
use crate::channel::ConnectionState;

/// Statistics about a streaming session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,

    pub mode: SessionMode,

    /// Recognition channel state
    pub connection: ConnectionState,

    /// Whether the sampler loop is running
    pub is_sampling: bool,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Frames taken from the source
    pub frames_sampled: u64,

    /// Metadata/binary pairs written to the channel
    pub frames_sent: u64,

    /// Inbound messages received, including malformed ones
    pub messages_received: u64,

    pub malformed_messages: u64,

    /// Detections admitted into the history
    pub detections_count: u64,

    /// Detections dropped as duplicates
    pub suppressed_count: u64,

    /// Records currently held (may be capped)
    pub history_len: usize,

    /// Annotated frames painted on the preview
    pub frames_painted: u64,
}
