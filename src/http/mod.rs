//! HTTP API server for external control of the voice session
//!
//! This module provides a REST API standing in for the UI's toggle button:
//! - POST /session/toggle - Connect or disconnect depending on state
//! - POST /session/connect - Connect
//! - POST /session/disconnect - Disconnect (always succeeds)
//! - GET /session/status - State, audio level and error banner
//! - GET /session/stats - Session statistics
//! - GET /session/transcript - Coalesced transcript
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, StatusResponse};
pub use routes::create_router;
pub use state::AppState;
