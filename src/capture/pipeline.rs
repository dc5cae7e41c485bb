use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::level::{amplitude_level, CAPTURE_LEVEL_STRIDE, DEFAULT_LEVEL_GAIN};
use crate::audio::pcm::{encode_pcm, EncodedAudioBlob};
use crate::audio::AudioFrame;
use crate::events::EventSender;

/// Level settings for the capture side
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Rate tagged on outbound blobs
    pub sample_rate: u32,
    pub level_stride: usize,
    pub level_gain: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            level_stride: CAPTURE_LEVEL_STRIDE,
            level_gain: DEFAULT_LEVEL_GAIN,
        }
    }
}

/// What happened to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent,
    /// Outbound queue was full; stale audio is not kept
    Dropped,
    /// Transport is gone
    Closed,
}

/// Running counters, shared with whoever spawned the pipeline
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
}

impl CaptureStats {
    pub fn sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

/// Microphone frames in, level events and encoded blobs out
pub struct CapturePipeline {
    config: CaptureConfig,
    outbound: mpsc::Sender<EncodedAudioBlob>,
    events: EventSender,
    stats: Arc<CaptureStats>,
}

impl CapturePipeline {
    pub fn new(
        config: CaptureConfig,
        outbound: mpsc::Sender<EncodedAudioBlob>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            outbound,
            events,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Level, encode and hand one frame to the transport without waiting
    pub fn process_frame(&self, frame: &AudioFrame) -> FrameOutcome {
        let level = amplitude_level(
            frame.samples.iter().copied(),
            self.config.level_stride,
            self.config.level_gain,
        );
        self.events.level(level);

        let blob = encode_pcm(&frame.samples, self.config.sample_rate);

        match self.outbound.try_send(blob) {
            Ok(()) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Transport not ready, dropped frame {} ({} dropped total)",
                    frame.sequence, dropped
                );
                FrameOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => FrameOutcome::Closed,
        }
    }

    /// Process frames until capture ends or the transport closes
    pub async fn run(self, mut frames: mpsc::Receiver<AudioFrame>) {
        info!("Capture pipeline started");

        while let Some(frame) = frames.recv().await {
            if self.process_frame(&frame) == FrameOutcome::Closed {
                info!("Outbound channel closed, stopping capture pipeline");
                break;
            }
        }

        info!(
            "Capture pipeline stopped ({} frames sent, {} dropped)",
            self.stats.sent(),
            self.stats.dropped()
        );
    }

    pub fn spawn(self, frames: mpsc::Receiver<AudioFrame>) -> JoinHandle<()> {
        tokio::spawn(self.run(frames))
    }
}
