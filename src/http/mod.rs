//! HTTP API server for external control
//!
//! This module provides a REST API for driving streaming sessions:
//! - POST /sessions/start - Connect and start sampling a camera or video file
//! - POST /sessions/stop/:id - Stop a session (history stays available)
//! - GET /sessions/:id/status - Query session statistics
//! - GET /sessions/:id/detections - Deduplicated detection history
//! - GET /sessions/:id/export.csv - History as a CSV attachment
//! - GET /sessions/:id/preview - Latest annotated frame as JPEG
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{StartSessionRequest, StartSessionResponse, StopSessionResponse};
pub use routes::create_router;
pub use state::{AppState, SessionTable};
