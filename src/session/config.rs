use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::level::{CAPTURE_LEVEL_STRIDE, DEFAULT_LEVEL_GAIN, PLAYBACK_LEVEL_STRIDE};

/// Live service endpoint (BidiGenerateContent over WebSocket)
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_VOICE: &str = "Kore";

/// Persona the model is asked to adopt
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are Priya, a warm and upbeat assistant who is glad to help with anything: \
programming, science, everyday questions, writing, or advice. \
Explain things clearly and briefly. \
You are speaking with the user live over voice, so keep answers conversational \
and easy to follow by ear; avoid long lists and heavy formatting unless asked. \
When asked about code or technical details, walk through the reasoning out loud.";

/// Configuration for one voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket endpoint of the live service
    pub endpoint: String,

    /// Model identifier requested at setup
    pub model: String,

    /// Prebuilt voice used for synthesized speech
    pub voice: String,

    /// System persona text
    pub system_instruction: String,

    /// Request input/output speech transcription
    pub transcription: bool,

    /// Upper bound on the open handshake
    pub handshake_timeout: Duration,

    /// Microphone capture rate (Hz)
    pub input_sample_rate: u32,

    /// Rate of synthesized speech (Hz)
    pub output_sample_rate: u32,

    /// Samples per capture frame
    pub frame_size: usize,

    /// Outbound frames queued before new frames are dropped
    pub outbound_queue_frames: usize,

    pub capture_level_stride: usize,
    pub playback_level_stride: usize,
    pub level_gain: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            transcription: true,
            handshake_timeout: Duration::from_secs(15),
            input_sample_rate: 16000,  // Live service expects 16kHz input
            output_sample_rate: 24000, // and speaks at 24kHz
            frame_size: 4096,
            outbound_queue_frames: 8,
            capture_level_stride: CAPTURE_LEVEL_STRIDE,
            playback_level_stride: PLAYBACK_LEVEL_STRIDE,
            level_gain: DEFAULT_LEVEL_GAIN,
        }
    }
}
