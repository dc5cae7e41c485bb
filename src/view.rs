//! UI-side view of a voice session
//!
//! Folds the state and transcript event streams into what a front end shows:
//! the current state, the coalesced transcript and the error banner.

use serde::Serialize;

use crate::session::SessionState;
use crate::transcript::{TranscriptLog, TranscriptMessage};

/// Banner shown while the session is in the `Error` state
pub const ERROR_BANNER: &str = "Connection failed. Please check your API key and try again.";

#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub transcript: TranscriptLog,
    /// Set on `Error`, cleared on `Connected`
    pub error: Option<String>,
}

impl SessionView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_state(&mut self, state: SessionState) {
        match state {
            SessionState::Error => self.error = Some(ERROR_BANNER.to_string()),
            SessionState::Connected => self.error = None,
            _ => {}
        }
        self.state = state;
    }

    pub fn apply_transcript(&mut self, fragment: TranscriptMessage) {
        self.transcript.apply(fragment);
    }
}
