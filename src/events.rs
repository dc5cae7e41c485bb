//! Outbound event channels for the UI boundary
//!
//! Three channels leave the audio subsystem:
//! - connection-state changes (every transition, in order)
//! - transcript updates (every fragment, in order)
//! - instantaneous audio level (latest value wins)
//!
//! Senders are cloneable and safe to use from the device callback threads.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::session::SessionState;
use crate::transcript::TranscriptMessage;

/// Producer half, handed to the session and its pipelines
#[derive(Debug, Clone)]
pub struct EventSender {
    state: mpsc::UnboundedSender<SessionState>,
    transcript: mpsc::UnboundedSender<TranscriptMessage>,
    level: Arc<watch::Sender<f32>>,
}

/// Consumer half, owned by whatever renders the UI
#[derive(Debug)]
pub struct EventReceivers {
    pub state: mpsc::UnboundedReceiver<SessionState>,
    pub transcript: mpsc::UnboundedReceiver<TranscriptMessage>,
    pub level: watch::Receiver<f32>,
}

/// Create a connected sender/receiver pair
pub fn event_channels() -> (EventSender, EventReceivers) {
    let (state_tx, state_rx) = mpsc::unbounded_channel();
    let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
    let (level_tx, level_rx) = watch::channel(0.0);

    (
        EventSender {
            state: state_tx,
            transcript: transcript_tx,
            level: Arc::new(level_tx),
        },
        EventReceivers {
            state: state_rx,
            transcript: transcript_rx,
            level: level_rx,
        },
    )
}

impl EventSender {
    // A closed receiver means nobody is rendering; events are dropped.

    pub fn state(&self, state: SessionState) {
        let _ = self.state.send(state);
    }

    pub fn transcript(&self, message: TranscriptMessage) {
        let _ = self.transcript.send(message);
    }

    pub fn level(&self, level: f32) {
        self.level.send_replace(level);
    }
}
