use super::state::AppState;
use crate::detection::DetectionRecord;
use crate::export;
use crate::media::{FfmpegSourceConfig, MediaSource, MediaSourceFactory, SourceSpec};
use crate::session::{SessionConfig, SessionStats, StreamSession};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Optional session ID (if not provided, generate one)
    pub session_id: Option<String>,

    /// Camera device or video file to stream
    pub source: SourceSpec,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn not_found(session_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Session {} not found", session_id),
    )
}

/// Hand the source to a connected session and start sampling
///
/// On failure the session is stopped again, which releases the source and
/// closes the channel.
async fn begin_streaming(
    session: &StreamSession,
    session_id: &str,
    source: Box<dyn MediaSource>,
) -> Result<(), Response> {
    session.select_source(source).await;

    let failure = match session.start().await {
        Ok(true) => return Ok(()),
        Ok(false) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Recognition channel closed before sampling started".to_string(),
        ),
        Err(e) => {
            error!("Failed to start session {}: {:#}", session_id, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to start session: {:#}", e),
            )
        }
    };

    if let Err(e) = session.stop().await {
        warn!("Cleanup after failed start of {} failed: {:#}", session_id, e);
    }

    Err(failure)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions/start
/// Connect to the recognition service and start sampling a source
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let kind = req.source.kind();
    let mut config = SessionConfig::from_config(&state.config, kind);
    if let Some(session_id) = req.session_id {
        config.session_id = session_id;
    }
    let session_id = config.session_id.clone();

    info!("Starting session: {}", session_id);

    // Check if the id is taken
    {
        let sessions = state.sessions.read().await;
        if sessions.contains(&session_id) {
            return error_response(
                StatusCode::CONFLICT,
                format!("Session {} already exists", session_id),
            );
        }
    }

    let source = match MediaSourceFactory::create(
        req.source,
        FfmpegSourceConfig::from(&state.config.sampling),
    ) {
        Ok(source) => source,
        Err(e) => {
            warn!("Rejected source for {}: {:#}", session_id, e);
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid source: {:#}", e));
        }
    };

    let session = Arc::new(StreamSession::new(config));

    if let Err(e) = session.connect().await {
        error!("Failed to connect session {}: {:#}", session_id, e);
        return error_response(StatusCode::BAD_GATEWAY, format!("{:#}", e));
    }

    if let Err(response) = begin_streaming(&session, &session_id, source).await {
        return response;
    }

    // Store session; a concurrent start may have taken the id meanwhile
    let inserted = state
        .sessions
        .write()
        .await
        .insert(session_id.clone(), Arc::clone(&session));
    if !inserted {
        if let Err(e) = session.stop().await {
            warn!("Cleanup of duplicate session {} failed: {:#}", session_id, e);
        }
        return error_response(
            StatusCode::CONFLICT,
            format!("Session {} already exists", session_id),
        );
    }

    info!("Session {} started", session_id);

    (
        StatusCode::OK,
        Json(StartSessionResponse {
            session_id: session_id.clone(),
            status: "streaming".to_string(),
            message: format!("Streaming started for session {}", session_id),
        }),
    )
        .into_response()
}

/// POST /sessions/stop/:session_id
/// Stop a session; its history stays available
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("Stopping session: {}", session_id);

    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    match session.stop().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(StopSessionResponse {
                session_id,
                status: "stopped".to_string(),
                message: "Streaming stopped".to_string(),
                stats,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to stop session {}: {:#}", session_id, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to stop session: {:#}", e),
            )
        }
    }
}

/// GET /sessions/:session_id/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.session(&session_id).await {
        Some(session) => (StatusCode::OK, Json(session.get_stats().await)).into_response(),
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/detections
/// Deduplicated history, sorted by timestamp
pub async fn get_session_detections(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.session(&session_id).await {
        Some(session) => {
            let history: Vec<DetectionRecord> = session.history().await;
            (StatusCode::OK, Json(history)).into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/export.csv
pub async fn export_session_csv(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    match session.export_csv().await {
        Ok(csv) => {
            let disposition = format!(
                "attachment; filename=\"{}\"",
                export::default_file_name(chrono::Local::now())
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                csv,
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to export session {}: {:#}", session_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

/// GET /sessions/:session_id/preview
/// Latest annotated frame
pub async fn get_session_preview(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    match session.preview_jpeg() {
        Ok(Some(jpeg)) => (StatusCode::OK, [(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("No annotated frame yet for session {}", session_id),
        ),
        Err(e) => {
            error!("Failed to render preview for {}: {:#}", session_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ConnectionState;
    use crate::config::Config;
    use crate::media::{SampledFrame, SourceKind, SourceState};
    use anyhow::Result;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        fail_start: bool,
        releases: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl MediaSource for StubSource {
        async fn start(&mut self) -> Result<()> {
            if self.fail_start {
                anyhow::bail!("device busy");
            }
            Ok(())
        }

        fn snapshot(&self, timestamp: f64) -> SampledFrame {
            SampledFrame::empty(timestamp)
        }

        fn position(&self) -> f64 {
            0.0
        }

        fn dimensions(&self) -> (u32, u32) {
            (0, 0)
        }

        fn state(&self) -> SourceState {
            SourceState::Idle
        }

        async fn release(&mut self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Camera
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn stub(fail_start: bool) -> (Box<dyn MediaSource>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = StubSource {
            fail_start,
            releases: Arc::clone(&releases),
        };
        (Box::new(source), releases)
    }

    /// Loopback service that accepts and holds every connection
    async fn silent_service() -> Result<String> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });
        Ok(format!("ws://{}", addr))
    }

    #[tokio::test]
    async fn test_unconnected_start_releases_source() {
        let config = SessionConfig::from_config(&Config::default(), SourceKind::Camera);
        let session = StreamSession::new(config);
        let (source, releases) = stub(false);

        let response = begin_streaming(&session, "cam-1", source)
            .await
            .unwrap_err();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!session.is_sampling());
    }

    #[tokio::test]
    async fn test_failed_source_start_cleans_up() -> Result<()> {
        let mut cfg = Config::default();
        cfg.recognition.endpoint = silent_service().await?;
        let session = StreamSession::new(SessionConfig::from_config(&cfg, SourceKind::Camera));
        session.connect().await?;
        assert_eq!(session.connection_state(), ConnectionState::Connected);

        let (source, releases) = stub(true);
        let response = begin_streaming(&session, "cam-2", source)
            .await
            .unwrap_err();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(session.connection_state(), ConnectionState::Closed);

        Ok(())
    }
}
