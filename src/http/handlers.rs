use super::state::AppState;
use crate::error::SessionError;
use crate::session::{SessionState, SessionStats};
use crate::transcript::TranscriptMessage;
use crate::view::ERROR_BANNER;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: SessionState,
    pub level: f32,
    /// Banner text while the last connection attempt failed
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub state: SessionState,
}

fn status(state: &AppState) -> StatusResponse {
    StatusResponse {
        state: state.session.state(),
        level: *state.level.borrow(),
        error: state
            .session
            .last_error()
            .map(|_| ERROR_BANNER.to_string()),
    }
}

fn status_code(err: &SessionError) -> StatusCode {
    match err {
        SessionError::MissingCredential => StatusCode::PRECONDITION_FAILED,
        SessionError::AlreadyActive | SessionError::Cancelled => StatusCode::CONFLICT,
        SessionError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Transport(_) => StatusCode::BAD_GATEWAY,
    }
}

fn connect_response(state: &AppState, result: Result<(), SessionError>) -> axum::response::Response {
    match result {
        Ok(()) => (StatusCode::OK, Json(status(state))).into_response(),
        Err(e) => {
            error!("Connect failed: {}", e);
            (
                status_code(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                    state: state.session.state(),
                }),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/toggle
/// Connect when idle or failed, disconnect otherwise
pub async fn toggle_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Toggle requested (state: {})", state.session.state());
    let result = state.session.toggle_connection().await;
    connect_response(&state, result)
}

/// POST /session/connect
pub async fn connect_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Connect requested");
    let result = state.session.connect().await;
    connect_response(&state, result)
}

/// POST /session/disconnect
pub async fn disconnect_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Disconnect requested");
    state.session.disconnect().await;
    (StatusCode::OK, Json(status(&state)))
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(status(&state)))
}

/// GET /session/stats
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats: SessionStats = state.session.get_stats().await;
    (StatusCode::OK, Json(stats))
}

/// GET /session/transcript
/// Transcript coalesced so far
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript: Vec<TranscriptMessage> = state.view.read().await.transcript.messages().to_vec();
    (StatusCode::OK, Json(transcript))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
