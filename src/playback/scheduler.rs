use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::audio::level::{amplitude_level, DEFAULT_LEVEL_GAIN, PLAYBACK_LEVEL_STRIDE};
use crate::audio::pcm::{decode_blob, mime_sample_rate, EncodedAudioBlob, PcmBuffer};
use crate::audio::sink::{OutputSink, UnitId};
use crate::events::EventSender;

/// Playback settings
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Rate inbound PCM is decoded at
    pub sample_rate: u32,
    pub level_stride: usize,
    pub level_gain: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            level_stride: PLAYBACK_LEVEL_STRIDE,
            level_gain: DEFAULT_LEVEL_GAIN,
        }
    }
}

/// A unit of audio placed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    pub id: UnitId,
    /// Seconds on the output clock
    pub start_time: f64,
    pub duration: f64,
}

impl ScheduledUnit {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Gapless back-to-back scheduling of decoded chunks on one output sink
///
/// One scheduler exists per connection. `next_start_time` never moves
/// backwards except through [`PlaybackScheduler::interrupt`].
pub struct PlaybackScheduler {
    config: PlaybackConfig,
    sink: Box<dyn OutputSink>,
    events: EventSender,
    next_start_time: f64,
    active: HashMap<UnitId, ScheduledUnit>,
    next_id: UnitId,
    dropped_chunks: u64,
}

impl PlaybackScheduler {
    pub fn new(config: PlaybackConfig, sink: Box<dyn OutputSink>, events: EventSender) -> Self {
        let next_start_time = sink.current_time();
        info!(
            "Playback scheduler on {} at {}Hz (clock {:.3}s)",
            sink.name(),
            config.sample_rate,
            next_start_time
        );

        Self {
            config,
            sink,
            events,
            next_start_time,
            active: HashMap::new(),
            next_id: 0,
            dropped_chunks: 0,
        }
    }

    /// Decode and schedule one inbound blob
    ///
    /// A chunk that fails to decode or schedule is logged and skipped; the
    /// watermark is left untouched so the next chunk plays on time.
    pub fn enqueue(&mut self, blob: &EncodedAudioBlob) -> Option<ScheduledUnit> {
        if let Some(rate) = mime_sample_rate(&blob.mime_type) {
            if rate != self.config.sample_rate {
                warn!(
                    "Chunk advertises {}Hz, decoding at {}Hz",
                    rate, self.config.sample_rate
                );
            }
        }

        let buffer = match decode_blob(blob, self.config.sample_rate) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.dropped_chunks += 1;
                warn!("Dropping undecodable audio chunk: {}", e);
                return None;
            }
        };

        match self.schedule_buffer(&buffer) {
            Ok(unit) => Some(unit),
            Err(e) => {
                self.dropped_chunks += 1;
                error!("Failed to schedule audio chunk: {}", e);
                None
            }
        }
    }

    /// Place a decoded buffer right after everything already scheduled
    pub fn schedule_buffer(&mut self, buffer: &PcmBuffer) -> Result<ScheduledUnit> {
        self.reap_finished();

        let now = self.sink.current_time();
        let start_time = self.next_start_time.max(now);
        let id = self.next_id;

        self.sink.schedule(id, start_time, buffer)?;

        let unit = ScheduledUnit {
            id,
            start_time,
            duration: buffer.duration(),
        };
        self.next_id += 1;
        self.next_start_time = unit.end_time();
        self.active.insert(id, unit);

        let level = amplitude_level(
            buffer.first_channel(),
            self.config.level_stride,
            self.config.level_gain,
        );
        self.events.level(level);

        debug!(
            "Scheduled unit {} at {:.3}s for {:.3}s (watermark {:.3}s)",
            id, start_time, unit.duration, self.next_start_time
        );

        Ok(unit)
    }

    /// Stop everything scheduled and restart the timeline at "now"
    ///
    /// Returns how many units were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();

        for id in self.active.keys() {
            if let Err(e) = self.sink.stop(*id) {
                warn!("Failed to stop playback unit {}: {}", id, e);
            }
        }
        self.active.clear();
        self.next_start_time = self.sink.current_time();

        if stopped > 0 {
            info!("Playback interrupted, {} units stopped", stopped);
        }

        stopped
    }

    /// Forget units whose end time has passed on the output clock
    pub fn reap_finished(&mut self) -> usize {
        let now = self.sink.current_time();
        let before = self.active.len();
        self.active.retain(|_, unit| unit.end_time() > now);
        before - self.active.len()
    }

    /// Stop all audio and release the output device
    pub fn shutdown(&mut self) -> Result<()> {
        self.interrupt();
        self.sink.close()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: UnitId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn current_time(&self) -> f64 {
        self.sink.current_time()
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks
    }
}
