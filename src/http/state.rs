use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::session::{SessionState, VoiceSession};
use crate::transcript::TranscriptMessage;
use crate::view::SessionView;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one voice session this process drives
    pub session: VoiceSession,

    /// State, transcript and error banner as a front end would show them
    pub view: Arc<RwLock<SessionView>>,

    /// Latest audio level
    pub level: watch::Receiver<f32>,
}

impl AppState {
    pub fn new(session: VoiceSession, level: watch::Receiver<f32>) -> Self {
        Self {
            session,
            view: Arc::new(RwLock::new(SessionView::new())),
            level,
        }
    }

    /// Fold session events into the view until both channels close
    pub fn spawn_event_pump(
        &self,
        mut states: mpsc::UnboundedReceiver<SessionState>,
        mut transcripts: mpsc::UnboundedReceiver<TranscriptMessage>,
    ) -> JoinHandle<()> {
        let view = Arc::clone(&self.view);

        tokio::spawn(async move {
            info!("Event pump started");

            let mut states_open = true;
            let mut transcripts_open = true;

            while states_open || transcripts_open {
                tokio::select! {
                    state = states.recv(), if states_open => match state {
                        Some(state) => {
                            debug!("UI state: {}", state);
                            view.write().await.apply_state(state);
                        }
                        None => states_open = false,
                    },
                    fragment = transcripts.recv(), if transcripts_open => match fragment {
                        Some(fragment) => view.write().await.apply_transcript(fragment),
                        None => transcripts_open = false,
                    },
                }
            }

            info!("Event pump stopped");
        })
    }
}
