use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::sink::OutputSink;

/// One fixed-size frame of mono microphone audio
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Float samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Capture order, starting at 0
    pub sequence: u64,
}

/// Configuration for a capture backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Capture sample rate the frames are delivered at
    pub target_sample_rate: u32,
    /// Samples per delivered frame
    pub frame_size: usize,
    /// Frames the device may queue ahead of the pipeline before dropping
    pub queue_frames: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz mono for the live service
            frame_size: 4096,
            queue_frames: 8,
        }
    }
}

impl AudioBackendConfig {
    /// Duration of one frame in milliseconds
    pub fn frame_duration_ms(&self) -> u64 {
        (self.frame_size as u64 * 1000) / u64::from(self.target_sample_rate.max(1))
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - cpal: default microphone
/// - File: replay a WAV file (for testing/headless runs)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. Acquiring the
    /// device (and any permission prompt) happens here.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Acquires the capture and playback devices for one connection
#[async_trait::async_trait]
pub trait AudioDevices: Send + Sync {
    /// Open the output sink at `sample_rate`
    async fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputSink>>;

    /// Create a capture backend; the caller starts it
    async fn open_capture(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>>;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default microphone (all platforms)
    Microphone,
    /// WAV file input
    File(PathBuf),
}

/// Platform devices: cpal microphone or a WAV file, cpal speakers or a muted sink
#[derive(Debug, Clone)]
pub struct SystemAudioDevices {
    source: AudioSource,
    mute: bool,
}

impl SystemAudioDevices {
    pub fn new(source: AudioSource, mute: bool) -> Self {
        Self { source, mute }
    }
}

#[async_trait::async_trait]
impl AudioDevices for SystemAudioDevices {
    async fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputSink>> {
        if self.mute {
            use super::clock::MonotonicClock;
            use super::sink::NullSink;
            use std::sync::Arc;

            return Ok(Box::new(NullSink::new(Arc::new(MonotonicClock::new()))));
        }

        let speaker = super::cpal_backend::CpalSpeaker::open(sample_rate).await?;
        Ok(Box::new(speaker))
    }

    async fn open_capture(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match &self.source {
            AudioSource::Microphone => {
                let mic = super::cpal_backend::CpalMicrophone::new(config.clone())?;
                Ok(Box::new(mic))
            }

            AudioSource::File(path) => {
                let file = super::file::FileBackend::open(path, config.clone())?;
                Ok(Box::new(file))
            }
        }
    }
}
