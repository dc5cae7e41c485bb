use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::level::{CAPTURE_LEVEL_STRIDE, DEFAULT_LEVEL_GAIN, PLAYBACK_LEVEL_STRIDE};
use crate::session::{
    SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE,
};

/// Default config file, extension resolved by the `config` crate
pub const DEFAULT_CONFIG_PATH: &str = "config/voice-live";

/// Environment variables checked for the API key, in order
pub const API_KEY_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub transcription: bool,
    pub handshake_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-live".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            transcription: true,
            handshake_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub outbound_queue_frames: usize,
    pub capture_level_stride: usize,
    pub playback_level_stride: usize,
    pub level_gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            frame_size: 4096,
            outbound_queue_frames: 8,
            capture_level_stride: CAPTURE_LEVEL_STRIDE,
            playback_level_stride: PLAYBACK_LEVEL_STRIDE,
            level_gain: DEFAULT_LEVEL_GAIN,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl Config {
    /// Load from an optional file, overridden by `VOICE_LIVE_<SECTION>__<KEY>`
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("VOICE_LIVE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.service.endpoint.clone(),
            model: self.service.model.clone(),
            voice: self.service.voice.clone(),
            system_instruction: self.service.system_instruction.clone(),
            transcription: self.service.transcription,
            handshake_timeout: Duration::from_secs(self.service.handshake_timeout_secs),
            input_sample_rate: self.audio.input_sample_rate,
            output_sample_rate: self.audio.output_sample_rate,
            frame_size: self.audio.frame_size,
            outbound_queue_frames: self.audio.outbound_queue_frames,
            capture_level_stride: self.audio.capture_level_stride,
            playback_level_stride: self.audio.playback_level_stride,
            level_gain: self.audio.level_gain,
        }
    }
}

/// Read the API key once from the process environment
pub fn api_key_from_env() -> Option<String> {
    API_KEY_VARS.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .filter(|value| !value.trim().is_empty())
    })
}
