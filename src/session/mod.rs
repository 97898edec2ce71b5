//! Streaming session management
//!
//! `StreamSession` ties one media source to one recognition channel:
//! - Frame sampling, JPEG encoding and outbound streaming
//! - Inbound decoding, annotated frame preview
//! - Deduplicated detection history and CSV export
//! - Cooperative stop that releases the source and closes the channel once

mod config;
mod session;
mod stats;

pub use config::{new_session_id, SessionConfig, SessionMode};
pub use session::StreamSession;
pub use stats::SessionStats;
