//! Sample-rate conversion for devices that do not run at a multiple of the
//! wire rate (44.1 kHz hardware, mostly)

use anyhow::{anyhow, Result};
use rubato::{FftFixedIn, Resampler};

/// Input frames per FFT block
const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Mono resampler fed with arbitrarily sized buffers
///
/// Input is held back until a whole block is available, so output lags input
/// by up to one block plus the filter delay.
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(anyhow!("Sample rate cannot be zero"));
        }

        let inner = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_SIZE,
            SUB_CHUNKS,
            1,
        )
        .map_err(|e| anyhow!("Resampler init failed: {}", e))?;

        Ok(Self {
            inner,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    /// Resample every complete block now available
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let block: Vec<f32> = self.pending.drain(..needed).collect();
            let result = self
                .inner
                .process(&[block], None)
                .map_err(|e| anyhow!("Resample failed: {}", e))?;
            out.extend_from_slice(&result[0]);
        }

        Ok(out)
    }

    /// Push out held-back input and the filter tail
    fn flush(&mut self, wanted: usize, out: &mut Vec<f32>) -> Result<()> {
        let rest = [std::mem::take(&mut self.pending)];
        let result = self
            .inner
            .process_partial(Some(&rest[..]), None)
            .map_err(|e| anyhow!("Resample failed: {}", e))?;
        out.extend_from_slice(&result[0]);

        // Each empty block advances the filter by one chunk
        let mut rounds = 0;
        while out.len() < wanted && rounds < 4 {
            let result = self
                .inner
                .process_partial::<Vec<f32>>(None, None)
                .map_err(|e| anyhow!("Resample failed: {}", e))?;
            out.extend_from_slice(&result[0]);
            rounds += 1;
        }

        Ok(())
    }
}

/// Resample one complete mono buffer, delay-compensated
///
/// Output length is `len * to_rate / from_rate`, rounded up.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let expected = (samples.len() as u64 * u64::from(to_rate)).div_ceil(u64::from(from_rate)) as usize;

    let mut resampler = StreamResampler::new(from_rate, to_rate)?;
    let delay = resampler.inner.output_delay();

    let mut out = resampler.process(samples)?;
    resampler.flush(delay + expected, &mut out)?;

    let start = delay.min(out.len());
    out.drain(..start);
    out.resize(expected, 0.0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: u32, seconds: f32) -> Vec<f32> {
        (0..(rate as f32 * seconds) as usize)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_same_rate_passes_through() {
        let input = vec![0.5, 0.3, 0.1, -0.2];
        assert_eq!(resample(&input, 24000, 24000).unwrap(), input);
    }

    #[test]
    fn test_one_shot_length_matches_rate_ratio() {
        let input = tone(24000, 0.5);
        let output = resample(&input, 24000, 44100).unwrap();
        assert_eq!(output.len(), 22050);
    }

    #[test]
    fn test_one_shot_keeps_amplitude() {
        let input = tone(24000, 0.5);
        let output = resample(&input, 24000, 44100).unwrap();

        // Skip the edges where the filter ramps
        let peak = output[2000..20000]
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {}", peak);
    }

    #[test]
    fn test_stream_converts_44k_to_16k() {
        let mut resampler = StreamResampler::new(44100, 16000).unwrap();
        let input = tone(44100, 1.0);

        let mut output = Vec::new();
        // Odd-sized pieces, like device callbacks
        for piece in input.chunks(441) {
            output.extend(resampler.process(piece).unwrap());
        }

        // Everything but the last held-back block comes out
        assert!(output.len() > 15000 && output.len() <= 16000, "got {}", output.len());
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(StreamResampler::new(0, 16000).is_err());
        assert!(StreamResampler::new(44100, 0).is_err());
    }
}
