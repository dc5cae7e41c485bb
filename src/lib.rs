pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod playback;
pub mod session;
pub mod transcript;
pub mod view;
pub mod visualizer;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioDevices, AudioFile, AudioFrame, AudioSource,
    EncodedAudioBlob, FileBackend, NullSink, OutputSink, PcmBuffer, SystemAudioDevices,
};
pub use capture::{CaptureConfig, CapturePipeline};
pub use config::{api_key_from_env, Config};
pub use error::SessionError;
pub use events::{event_channels, EventReceivers, EventSender};
pub use http::{create_router, AppState};
pub use playback::{PlaybackConfig, PlaybackScheduler};
pub use session::{
    LiveConnector, SessionConfig, SessionState, SessionStats, VoiceSession, WebSocketConnector,
};
pub use transcript::{Role, TranscriptLog, TranscriptMessage};
pub use view::SessionView;
pub use visualizer::Visualizer;
