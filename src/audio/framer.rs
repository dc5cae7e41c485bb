// Splits arbitrarily sized device callback buffers into fixed-size frames

/// Accumulates samples and yields complete frames of `frame_size`
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Add samples, returning every frame that became complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let needed = self.frame_size - self.pending.len();
            let take = needed.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(frame);
            }
        }

        frames
    }

    /// Samples waiting for the next frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Downsample by an integer factor, keeping every Nth sample across calls
#[derive(Debug)]
pub struct Decimator {
    factor: usize,
    phase: usize,
}

impl Decimator {
    pub fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
            phase: 0,
        }
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.factor == 1 {
            return samples.to_vec();
        }

        let mut out = Vec::with_capacity(samples.len() / self.factor + 1);
        for &sample in samples {
            if self.phase == 0 {
                out.push(sample);
            }
            self.phase = (self.phase + 1) % self.factor;
        }
        out
    }
}

/// Average interleaved channels down to mono
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / f32::from(channels))
        .collect()
}
