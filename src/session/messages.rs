// Wire format of the live service (JSON over WebSocket)
//
// Client → server: one `setup` message, then `realtimeInput` audio frames.
// Server → client: `setupComplete`, then `serverContent` carrying model audio,
// transcription fragments, interruption and turn-complete flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::link::{LiveSetup, ServerEvent};
use crate::audio::pcm::EncodedAudioBlob;
use crate::transcript::Role;

/// Placeholder for capabilities that are switched on by presence alone
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enabled {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Enabled>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Enabled>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<EncodedAudioBlob>,
}

impl SetupMessage {
    pub fn from_setup(config: &LiveSetup) -> Self {
        let transcription = config.transcription.then(Enabled::default);

        Self {
            setup: Setup {
                model: config.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![Part {
                        text: Some(config.system_instruction.clone()),
                        inline_data: None,
                    }],
                },
                input_audio_transcription: transcription.clone(),
                output_audio_transcription: transcription,
            },
        }
    }
}

/// One outbound microphone frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<EncodedAudioBlob>,
}

impl RealtimeInputMessage {
    pub fn audio(blob: EncodedAudioBlob) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![blob],
            },
        }
    }
}

/// Any message the service sends; unknown fields are ignored
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("Failed to parse server message")
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into events, in the order they should be handled
    ///
    /// Audio first, then the interruption flag, then transcription: output
    /// fragments stay partial until the turn completes, input fragments are
    /// always partial since the service never completes an input turn.
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        let Some(content) = self.server_content else {
            return events;
        };

        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .filter(|blob| !blob.data.is_empty())
                    .map(ServerEvent::AudioChunk),
            );
        }

        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }

        if let Some(text) = content
            .output_transcription
            .and_then(|t| t.text)
            .filter(|t| !t.is_empty())
        {
            events.push(ServerEvent::Transcript {
                role: Role::Model,
                text,
                partial: !content.turn_complete,
            });
        }

        if let Some(text) = content
            .input_transcription
            .and_then(|t| t.text)
            .filter(|t| !t.is_empty())
        {
            events.push(ServerEvent::Transcript {
                role: Role::User,
                text,
                partial: true,
            });
        }

        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }

        events
    }
}
