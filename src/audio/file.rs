use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::framer::{downmix_to_mono, FrameAccumulator};

/// A WAV file loaded as mono float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

        let spec = reader.spec();
        let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .map(|s| s.map(super::pcm::i16_to_f32))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (format, bits) => bail!("Unsupported WAV format: {:?} {}-bit", format, bits),
        };

        let samples = downmix_to_mono(&interleaved, spec.channels);
        let duration_seconds = samples.len() as f64 / f64::from(spec.sample_rate);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Capture backend that replays a WAV file at real-time pace
pub struct FileBackend {
    file: AudioFile,
    config: AudioBackendConfig,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self> {
        let file = AudioFile::open(path)?;

        if file.sample_rate != config.target_sample_rate {
            bail!(
                "WAV sample rate {}Hz does not match capture rate {}Hz",
                file.sample_rate,
                config.target_sample_rate
            );
        }

        Ok(Self {
            file,
            config,
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(self.config.queue_frames.max(1));
        let samples = self.file.samples.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let mut framer = FrameAccumulator::new(config.frame_size);
            let frames = framer.push(&samples);
            let frame_ms = config.frame_duration_ms();
            let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms.max(1)));

            for (sequence, samples) in frames.into_iter().enumerate() {
                ticker.tick().await;

                let frame = AudioFrame {
                    samples,
                    sample_rate: config.target_sample_rate,
                    timestamp_ms: sequence as u64 * frame_ms,
                    sequence: sequence as u64,
                };

                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("File capture queue full, dropping frame {}", sequence);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }

            info!("File capture reached end of input");
        });

        self.task = Some(task);
        info!("File capture started: {}", self.file.path);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "wav file"
    }
}
