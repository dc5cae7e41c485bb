/// Gain applied to the raw mean amplitude so speech fills the visualizer
pub const DEFAULT_LEVEL_GAIN: f32 = 5.0;

/// Stride used on 4096-sample capture frames
pub const CAPTURE_LEVEL_STRIDE: usize = 50;

/// Stride used on decoded playback chunks, which are typically larger
pub const PLAYBACK_LEVEL_STRIDE: usize = 100;

/// Coarse amplitude estimate for visualization
///
/// Averages the absolute value of every `stride`-th sample and scales by `gain`.
/// Returns 0.0 for empty input.
pub fn amplitude_level<I>(samples: I, stride: usize, gain: f32) -> f32
where
    I: IntoIterator<Item = f32>,
{
    let mut sum = 0.0f32;
    let mut count = 0usize;

    for sample in samples.into_iter().step_by(stride.max(1)) {
        sum += sample.abs();
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }

    (sum / count as f32) * gain
}
