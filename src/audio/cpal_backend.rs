// cpal microphone capture and speaker output
//
// cpal streams are not Send on every platform, so each stream lives on its
// own worker thread for its whole life. The device callback runs on the
// platform's audio thread and only touches lock-free counters, a short-held
// mutex and non-blocking channel sends.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::clock::{Clock, SampleClock};
use super::framer::{downmix_to_mono, Decimator, FrameAccumulator};
use super::pcm::PcmBuffer;
use super::resample::{resample, StreamResampler};
use super::sink::{OutputSink, UnitId};

/// Largest integer ratio between device rate and requested rate we accept
const MAX_RATE_FACTOR: u32 = 6;

/// Device rates tried, in order, when no integer multiple is offered
const RESAMPLE_RATES: [u32; 2] = [48000, 44100];

/// How the device rate relates to the requested rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateMatch {
    /// Device runs at `n` times the requested rate
    Multiple(u32),
    /// Device runs at this rate and audio is resampled
    Resample(u32),
}

impl RateMatch {
    fn describe(&self) -> String {
        match self {
            RateMatch::Multiple(1) => "native".to_string(),
            RateMatch::Multiple(n) => format!("x{}", n),
            RateMatch::Resample(rate) => format!("resampled from {}Hz", rate),
        }
    }
}

fn describe_ranges(ranges: &[SupportedStreamConfigRange]) -> String {
    ranges
        .iter()
        .map(|r| {
            format!(
                "{}ch {:?} {}-{}Hz",
                r.channels(),
                r.sample_format(),
                r.min_sample_rate().0,
                r.max_sample_rate().0
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pick a stream config for `target_rate`
///
/// Prefers the exact rate, then an integer multiple of it, then a common
/// hardware rate to resample from. Mono is preferred at every step.
fn select_config<I>(ranges: I, target_rate: u32) -> Result<(StreamConfig, RateMatch)>
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    let offered: Vec<_> = ranges.collect();
    let mut usable: Vec<_> = offered
        .iter()
        .filter(|r| r.sample_format() == SampleFormat::F32 && r.channels() <= 2)
        .cloned()
        .collect();
    usable.sort_by_key(|r| r.channels());

    let supporting = |rate: SampleRate| {
        usable
            .iter()
            .find(|r| r.min_sample_rate() <= rate && r.max_sample_rate() >= rate)
    };

    for factor in 1..=MAX_RATE_FACTOR {
        let rate = SampleRate(target_rate * factor);
        if let Some(range) = supporting(rate) {
            return Ok((range.clone().with_sample_rate(rate).config(), RateMatch::Multiple(factor)));
        }
    }

    for rate in RESAMPLE_RATES {
        if let Some(range) = supporting(SampleRate(rate)) {
            let config = range.clone().with_sample_rate(SampleRate(rate)).config();
            return Ok((config, RateMatch::Resample(rate)));
        }
    }

    if let Some(range) = usable.first() {
        let config = range.clone().with_max_sample_rate().config();
        let rate = config.sample_rate.0;
        return Ok((config, RateMatch::Resample(rate)));
    }

    bail!(
        "No usable f32 config for {}Hz (device offers: {})",
        target_rate,
        describe_ranges(&offered)
    )
}

fn play(stream: cpal::Stream) -> Result<cpal::Stream> {
    stream.play().context("Failed to start audio stream")?;
    Ok(stream)
}

/// Keeps a stream's worker thread alive until stopped or dropped
struct StreamWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl StreamWorker {
    /// Spawn a thread that builds a resource with `build` and holds it until stopped
    async fn spawn<T, F>(name: &str, build: F) -> Result<Self>
    where
        T: 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let held = match build() {
                    Ok(held) => held,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));

                // Blocks until signalled or the worker is dropped
                let _ = stop_rx.recv();
                drop(held);
            })
            .context("Failed to spawn audio worker thread")?;

        ready_rx
            .await
            .map_err(|_| anyhow!("Audio worker exited before reporting readiness"))??;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    /// Tell the worker to release its stream; the thread then exits on its own
    fn signal(&mut self) -> Option<JoinHandle<()>> {
        let _ = self.stop_tx.send(());
        self.thread.take()
    }

    /// Stop and wait for the stream to be released, off the async threads
    async fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.signal() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || thread.join())
            .await
            .context("Audio worker join task failed")?
            .map_err(|_| anyhow!("Audio worker thread panicked"))
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.signal();
    }
}

/// Device-rate to wire-rate conversion on the capture path
enum Conversion {
    Decimate(Decimator),
    Resample(StreamResampler),
}

impl Conversion {
    fn new(rate: RateMatch, target_rate: u32) -> Result<Self> {
        Ok(match rate {
            RateMatch::Multiple(factor) => Conversion::Decimate(Decimator::new(factor as usize)),
            RateMatch::Resample(device_rate) => {
                Conversion::Resample(StreamResampler::new(device_rate, target_rate)?)
            }
        })
    }

    fn process(&mut self, mono: &[f32]) -> Vec<f32> {
        match self {
            Conversion::Decimate(decimator) => decimator.process(mono),
            Conversion::Resample(resampler) => resampler.process(mono).unwrap_or_else(|e| {
                error!("Capture resampling failed: {:#}", e);
                Vec::new()
            }),
        }
    }
}

/// Default-microphone capture via cpal
pub struct CpalMicrophone {
    config: AudioBackendConfig,
    worker: Option<StreamWorker>,
}

impl CpalMicrophone {
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        info!(
            "cpal microphone backend initialized ({}Hz, {} samples/frame)",
            config.target_sample_rate, config.frame_size
        );

        Ok(Self {
            config,
            worker: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.worker.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(self.config.queue_frames.max(1));
        let config = self.config.clone();

        let worker = StreamWorker::spawn("voice-live-capture", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?;

            let ranges = device
                .supported_input_configs()
                .context("Failed to query input configs")?;
            let (stream_config, rate) = select_config(ranges, config.target_sample_rate)?;

            info!(
                "Using input device {} ({}Hz, {} ch, {})",
                device.name().unwrap_or_default(),
                stream_config.sample_rate.0,
                stream_config.channels,
                rate.describe()
            );

            let channels = stream_config.channels;
            let mut conversion = Conversion::new(rate, config.target_sample_rate)?;
            let mut framer = FrameAccumulator::new(config.frame_size);
            let mut sequence = 0u64;
            let mut dropped = 0u64;
            let frame_ms = config.frame_duration_ms();
            let sample_rate = config.target_sample_rate;

            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix_to_mono(data, channels);
                        let samples = conversion.process(&mono);

                        for samples in framer.push(&samples) {
                            let frame = AudioFrame {
                                samples,
                                sample_rate,
                                timestamp_ms: sequence * frame_ms,
                                sequence,
                            };
                            sequence += 1;

                            // Never block the device thread
                            if tx.try_send(frame).is_err() {
                                dropped += 1;
                                if dropped % 50 == 1 {
                                    warn!("Capture queue full, {} frames dropped so far", dropped);
                                }
                            }
                        }
                    },
                    |err| {
                        error!("Audio capture error: {}", err);
                    },
                    None,
                )
                .context("Failed to open microphone stream")
                .and_then(play)
        })
        .await?;

        self.worker = Some(worker);
        info!("Microphone capture started");

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut worker) = self.worker.take() {
            worker.stop().await?;
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

/// A unit queued on the speaker, in device frames
struct Voice {
    id: UnitId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

/// Default-speaker output via cpal
///
/// Mixes every scheduled unit against a device-frame clock, so a unit starts on
/// exactly the frame its start time maps to.
pub struct CpalSpeaker {
    clock: SampleClock,
    voices: Arc<Mutex<Vec<Voice>>>,
    /// Rate of the audio handed to `schedule`
    sample_rate: u32,
    rate: RateMatch,
    worker: Option<StreamWorker>,
}

impl CpalSpeaker {
    pub async fn open(sample_rate: u32) -> Result<Self> {
        // Scoped so no device handle is held across the await below
        let (stream_config, rate) = {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| anyhow!("No output device available"))?;

            let ranges = device
                .supported_output_configs()
                .context("Failed to query output configs")?;
            let (stream_config, rate) = select_config(ranges, sample_rate)?;

            debug!(
                "Output device {} ({}Hz, {} ch, {})",
                device.name().unwrap_or_default(),
                stream_config.sample_rate.0,
                stream_config.channels,
                rate.describe()
            );

            (stream_config, rate)
        };

        let clock = SampleClock::new(stream_config.sample_rate.0);
        let voices: Arc<Mutex<Vec<Voice>>> = Arc::new(Mutex::new(Vec::new()));

        let worker = {
            let clock = clock.clone();
            let voices = Arc::clone(&voices);
            let channels = stream_config.channels as usize;
            // Resampled units are already at the device rate
            let factor = match rate {
                RateMatch::Multiple(factor) => u64::from(factor),
                RateMatch::Resample(_) => 1,
            };

            StreamWorker::spawn("voice-live-playback", move || {
                // Device handles are not Send; look the device up again on the worker
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or_else(|| anyhow!("No output device available"))?;

                device
                    .build_output_stream(
                        &stream_config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let frames = (data.len() / channels) as u64;
                            let base = clock.position();

                            data.fill(0.0);
                            if let Ok(mut voices) = voices.lock() {
                                for voice in voices.iter() {
                                    let len = voice.samples.len() as u64 * factor;
                                    let end = voice.start_frame + len;
                                    if end <= base || voice.start_frame >= base + frames {
                                        continue;
                                    }

                                    let from = voice.start_frame.max(base);
                                    let to = end.min(base + frames);
                                    for t in from..to {
                                        let sample = voice.samples[((t - voice.start_frame) / factor) as usize];
                                        let offset = (t - base) as usize * channels;
                                        for out in &mut data[offset..offset + channels] {
                                            *out += sample;
                                        }
                                    }
                                }

                                voices.retain(|v| {
                                    v.start_frame + v.samples.len() as u64 * factor > base + frames
                                });
                            }

                            for out in data.iter_mut() {
                                *out = out.clamp(-1.0, 1.0);
                            }
                            clock.advance_frames(frames);
                        },
                        |err| {
                            error!("Audio playback error: {}", err);
                        },
                        None,
                    )
                    .context("Failed to open speaker stream")
                    .and_then(play)
            })
            .await?
        };

        info!("Speaker output opened at {}Hz", sample_rate);

        Ok(Self {
            clock,
            voices,
            sample_rate,
            rate,
            worker: Some(worker),
        })
    }
}

impl OutputSink for CpalSpeaker {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn schedule(&mut self, id: UnitId, start_at: f64, buffer: &PcmBuffer) -> Result<()> {
        if self.worker.is_none() {
            bail!("Speaker output is closed");
        }

        let mono: Vec<f32> = buffer.first_channel().collect();
        let samples: Arc<[f32]> = match self.rate {
            RateMatch::Multiple(_) => mono.into(),
            RateMatch::Resample(device_rate) => resample(&mono, self.sample_rate, device_rate)?.into(),
        };
        let voice = Voice {
            id,
            start_frame: self.clock.frame_at(start_at),
            samples,
        };

        self.voices
            .lock()
            .map_err(|_| anyhow!("Speaker voice table poisoned"))?
            .push(voice);

        debug!("Scheduled unit {} at {:.3}s ({})", id, start_at, self.rate.describe());
        Ok(())
    }

    fn stop(&mut self, id: UnitId) -> Result<()> {
        self.voices
            .lock()
            .map_err(|_| anyhow!("Speaker voice table poisoned"))?
            .retain(|v| v.id != id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Ok(mut voices) = self.voices.lock() {
            voices.clear();
        }

        match self.worker.take() {
            Some(mut worker) => {
                // Called under the scheduler lock, so the thread is not joined
                worker.signal();
                info!("Speaker output closed");
                Ok(())
            }
            None => bail!("Speaker output already closed"),
        }
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}
