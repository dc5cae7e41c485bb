use thiserror::Error;

/// Failures surfaced to the UI as the `Error` connection state
#[derive(Debug, Error)]
pub enum SessionError {
    /// No API key in the environment; nothing was acquired
    #[error("API key is missing")]
    MissingCredential,

    /// A session is already connecting or connected
    #[error("a session is already connecting or connected")]
    AlreadyActive,

    /// Microphone permission denied or an audio device is unavailable
    #[error("audio device error: {0}")]
    Device(String),

    /// The live service refused, failed or dropped the connection
    #[error("transport error: {0}")]
    Transport(String),

    /// `disconnect()` ran while the connection was being established
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn device(err: anyhow::Error) -> Self {
        SessionError::Device(format!("{:#}", err))
    }

    pub fn transport(err: anyhow::Error) -> Self {
        SessionError::Transport(format!("{:#}", err))
    }

    /// Whether this failure moves the session to the `Error` state
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionError::MissingCredential | SessionError::Device(_) | SessionError::Transport(_)
        )
    }
}
