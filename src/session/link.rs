use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::config::SessionConfig;
use crate::audio::pcm::EncodedAudioBlob;
use crate::transcript::Role;

/// What the session needs to open a live link
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub transcription: bool,
}

impl From<&SessionConfig> for LiveSetup {
    fn from(config: &SessionConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            system_instruction: config.system_instruction.clone(),
            transcription: config.transcription,
        }
    }
}

/// Events delivered by the live service, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// One chunk of model speech
    AudioChunk(EncodedAudioBlob),

    /// The user started talking over the model; queued speech must stop
    Interrupted,

    /// A transcription fragment
    Transcript {
        role: Role,
        text: String,
        partial: bool,
    },

    /// The model finished its turn
    TurnComplete,

    /// The link failed; no further events follow
    Error(String),

    /// The link was closed by the remote end; no further events follow
    Closed(Option<String>),
}

/// Handle used to close an open link
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Close the link. Fails if it was already closed.
    async fn close(&mut self) -> Result<()>;
}

/// An open, set-up link to the live service
pub struct LiveChannel {
    pub inbound: mpsc::Receiver<ServerEvent>,
    pub control: Box<dyn SessionControl>,
}

/// Opens links to the live service
///
/// `outbound` carries encoded microphone frames; the connector owns it for
/// the lifetime of the link.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(
        &self,
        api_key: &str,
        setup: &LiveSetup,
        outbound: mpsc::Receiver<EncodedAudioBlob>,
    ) -> Result<LiveChannel>;
}
