//! Microphone capture pipeline
//!
//! Frames from the capture backend are leveled for the visualizer, encoded as
//! 16-bit PCM and offered to the transport's bounded outbound queue.

mod pipeline;

pub use pipeline::{CaptureConfig, CapturePipeline, CaptureStats, FrameOutcome};
