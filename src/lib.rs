pub mod channel;
pub mod config;
pub mod detection;
pub mod export;
pub mod history;
pub mod http;
pub mod media;
pub mod render;
pub mod session;

pub use channel::{ConnectionState, OutboundHandle, StreamingChannel};
pub use config::Config;
pub use detection::{DedupEngine, DetectionEvent, DetectionRecord, DisplayClock};
pub use history::{HistoryClient, HistoryRecord};
pub use http::{create_router, AppState};
pub use media::{
    FfmpegSource, FrameEncoder, FrameSampler, MediaSource, MediaSourceFactory, SourceKind,
    SourceSpec, SourceState,
};
pub use render::{ImageSurface, RenderPolicy, RenderSink, Surface};
pub use session::{SessionConfig, SessionStats, StreamSession};
