/// Samples per metering window: 50 ms at the 16 kHz target rate (~20 Hz updates).
pub const LEVEL_WINDOW_SAMPLES: usize = 800;

/// RMS → 0..100 scale factor. Normal speech RMS (~0.05–0.3) lands mid-scale.
pub const LEVEL_SCALE: f32 = 300.0;

/// Highest level value.
pub const MAX_LEVEL: u8 = 100;

/// Running sums for the current metering window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelAccumulator {
    pub sample_count: usize,
    pub sum_of_squares: f64,
}

impl LevelAccumulator {
    pub fn rms(&self) -> f32 {
        if self.sample_count == 0 {
            return 0.0;
        }
        (self.sum_of_squares / self.sample_count as f64).sqrt() as f32
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Windowed RMS meter over mono target-format samples.
///
/// Multi-channel input is averaged to mono by the format converter before it
/// reaches the meter.
#[derive(Debug, Clone)]
pub struct LevelMonitor {
    accumulator: LevelAccumulator,
    window: usize,
}

impl LevelMonitor {
    pub fn new() -> Self {
        Self::with_window(LEVEL_WINDOW_SAMPLES)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            accumulator: LevelAccumulator::default(),
            window: window.max(1),
        }
    }

    pub fn accumulate(&mut self, samples: &[f32]) {
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        self.accumulator.sum_of_squares += sum;
        self.accumulator.sample_count += samples.len();
    }

    /// Close the window once enough samples have arrived and return its level.
    pub fn maybe_emit_level(&mut self) -> Option<u8> {
        if self.accumulator.sample_count < self.window {
            return None;
        }
        let level = level_from_rms(self.accumulator.rms());
        self.accumulator.reset();
        Some(level)
    }

    pub fn accumulator(&self) -> &LevelAccumulator {
        &self.accumulator
    }
}

impl Default for LevelMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// `min(rms * 300, 100)` as an integer level. Non-finite input reads as 0.
pub fn level_from_rms(rms: f32) -> u8 {
    let scaled = rms * LEVEL_SCALE;
    if !scaled.is_finite() {
        return 0;
    }
    scaled.clamp(0.0, MAX_LEVEL as f32) as u8
}
