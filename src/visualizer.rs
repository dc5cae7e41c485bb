// Seven-bar level display
//
// Each bar rides the same level with its own phase offset so the row reads as
// a moving wave. The held level decays between updates so the bars fall back
// smoothly when audio stops.

/// Number of bars
pub const BAR_COUNT: usize = 7;

/// Height of an idle bar, as a fraction of full height
pub const MIN_HEIGHT: f32 = 0.04;

/// Phase step between neighbouring bars, in radians
const PHASE_STEP: f64 = 0.5;

/// Wave speed, in radians per second
const WAVE_SPEED: f64 = 10.0;

/// Wave amplitude added around the level
const WAVE_DEPTH: f32 = 0.2;

/// Glyphs from empty to full
const GLYPHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Debug, Clone)]
pub struct Visualizer {
    level: f32,
    /// Fraction of the held level kept per second
    decay_per_sec: f32,
    active: bool,
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl Visualizer {
    pub fn new(decay_per_sec: f32) -> Self {
        Self {
            level: 0.0,
            decay_per_sec: decay_per_sec.clamp(0.0, 1.0),
            active: false,
        }
    }

    /// Bars only move while a session is connected
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        if !active {
            self.level = 0.0;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feed a level sample from capture or playback
    pub fn push_level(&mut self, level: f32) {
        if level.is_finite() {
            self.level = self.level.max(level.max(0.0));
        }
    }

    /// Let `dt` seconds of decay pass
    pub fn tick(&mut self, dt: f64) {
        self.level *= self.decay_per_sec.powf(dt.max(0.0) as f32);
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Bar heights in [MIN_HEIGHT, 1.0] at time `t` seconds
    pub fn bars(&self, t: f64) -> [f32; BAR_COUNT] {
        let mut bars = [MIN_HEIGHT; BAR_COUNT];
        if !self.active {
            return bars;
        }

        for (i, bar) in bars.iter_mut().enumerate() {
            let phase = i as f64 * PHASE_STEP;
            let wave = (t * WAVE_SPEED + phase).sin() as f32 * WAVE_DEPTH;
            let varied = (self.level + wave).max(0.1);
            *bar = varied.clamp(MIN_HEIGHT, 1.0);
        }

        bars
    }

    /// One-line rendering of the bars at time `t`
    pub fn render(&self, t: f64) -> String {
        self.bars(t)
            .iter()
            .map(|h| {
                let idx = (h * (GLYPHS.len() - 1) as f32).round() as usize;
                GLYPHS[idx.min(GLYPHS.len() - 1)]
            })
            .collect()
    }
}
