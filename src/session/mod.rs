//! Voice session management
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - The connection state machine and its event channel
//! - Device acquisition for capture and playback
//! - The duplex link to the live service (`LiveConnector`)
//! - Dispatch of inbound audio, interruptions and transcription
//! - Teardown of everything a connection acquired

mod config;
pub mod link;
pub mod messages;
mod session;
mod state;
mod stats;
pub mod websocket;

pub use config::{
    SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE,
};
pub use link::{LiveChannel, LiveConnector, LiveSetup, ServerEvent, SessionControl};
pub use session::VoiceSession;
pub use state::SessionState;
pub use stats::SessionStats;
pub use websocket::WebSocketConnector;
