//! Gapless playback of model speech
//!
//! Inbound chunks are decoded and laid end to end on the output sink's
//! timeline. An interruption from the remote service stops everything queued
//! and restarts the timeline at the current output time.

mod scheduler;

pub use scheduler::{PlaybackConfig, PlaybackScheduler, ScheduledUnit};
