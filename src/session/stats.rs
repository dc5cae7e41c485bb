use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Statistics about the current voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current connection state
    pub state: SessionState,

    /// When the live link opened, if connected
    pub connected_at: Option<DateTime<Utc>>,

    /// Seconds since the live link opened
    pub duration_secs: f64,

    /// Microphone frames handed to the transport
    pub frames_sent: u64,

    /// Microphone frames dropped because the transport was not ready
    pub frames_dropped: u64,

    /// Speech units currently scheduled or playing
    pub active_units: usize,

    /// Inbound chunks that could not be decoded or scheduled
    pub chunks_dropped: u64,

    /// Message of the last failure, cleared on the next connect
    pub last_error: Option<String>,
}
