use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::clock::Clock;
use super::pcm::PcmBuffer;

/// Identity of one scheduled playback unit
pub type UnitId = u64;

/// Output audio sink with its own clock
///
/// A sink renders buffers at absolute times on its clock. It never reorders or
/// shifts them; gap/overlap policy belongs to the caller.
pub trait OutputSink: Send {
    /// Current position of the output clock in seconds
    fn current_time(&self) -> f64;

    /// Start rendering `buffer` at `start_at` seconds on the output clock
    fn schedule(&mut self, id: UnitId, start_at: f64, buffer: &PcmBuffer) -> Result<()>;

    /// Stop a scheduled unit immediately, whether or not it has started
    fn stop(&mut self, id: UnitId) -> Result<()>;

    /// Release the output device
    fn close(&mut self) -> Result<()>;

    /// Sink name for logging
    fn name(&self) -> &str;
}

/// One call to [`OutputSink::schedule`] as recorded by [`NullSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRecord {
    pub id: UnitId,
    pub start_at: f64,
    pub duration: f64,
}

/// Everything a [`NullSink`] has been asked to do
#[derive(Debug, Default)]
pub struct SinkRecord {
    pub scheduled: Vec<ScheduledRecord>,
    pub stopped: Vec<UnitId>,
    pub closed: bool,
}

/// Shared view of a [`NullSink`]'s record
#[derive(Debug, Clone, Default)]
pub struct SinkLog(Arc<Mutex<SinkRecord>>);

impl SinkLog {
    pub fn scheduled(&self) -> Vec<ScheduledRecord> {
        self.0.lock().map(|r| r.scheduled.clone()).unwrap_or_default()
    }

    pub fn stopped(&self) -> Vec<UnitId> {
        self.0.lock().map(|r| r.stopped.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.0.lock().map(|r| r.closed).unwrap_or(false)
    }

    fn with<F: FnOnce(&mut SinkRecord)>(&self, f: F) {
        if let Ok(mut record) = self.0.lock() {
            f(&mut record);
        }
    }
}

/// Sink that keeps time on an injected clock and discards audio
///
/// Used for muted sessions and for exercising playback timing without hardware.
pub struct NullSink {
    clock: Arc<dyn Clock>,
    log: SinkLog,
    closed: bool,
}

impl NullSink {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            log: SinkLog::default(),
            closed: false,
        }
    }

    /// Sink plus a handle for inspecting what it was asked to do
    pub fn with_log(clock: Arc<dyn Clock>) -> (Self, SinkLog) {
        let sink = Self::new(clock);
        let log = sink.log.clone();
        (sink, log)
    }
}

impl OutputSink for NullSink {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn schedule(&mut self, id: UnitId, start_at: f64, buffer: &PcmBuffer) -> Result<()> {
        if self.closed {
            bail!("output sink is closed");
        }

        debug!("Null sink: unit {} at {:.3}s ({:.3}s)", id, start_at, buffer.duration());
        self.log.with(|r| {
            r.scheduled.push(ScheduledRecord {
                id,
                start_at,
                duration: buffer.duration(),
            })
        });
        Ok(())
    }

    fn stop(&mut self, id: UnitId) -> Result<()> {
        self.log.with(|r| r.stopped.push(id));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            bail!("output sink already closed");
        }
        self.closed = true;
        self.log.with(|r| r.closed = true);
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}
