//! Native → target format conversion.
//!
//! The converter is built once per graph and reused for every buffer; its
//! scratch space is sized for one second of native audio so steady-state
//! callbacks never allocate. Downsampling runs a windowed-sinc low-pass ahead
//! of the interpolator so content above the target Nyquist does not fold back
//! into the speech band.

use std::f64::consts::PI;

use crate::models::audio_format::{AudioFormat, NativeSamples, SampleRepresentation};
use crate::models::error::EngineError;

/// The fixed format all metered and captured audio is normalized to.
pub fn build_target_format() -> AudioFormat {
    AudioFormat::target()
}

/// Whether buffers in `native` must pass through a [`Converter`].
pub fn needs_conversion(native: &AudioFormat, target: &AudioFormat) -> bool {
    native != target
}

/// Build the converter for a graph, or `None` when the hardware already
/// delivers the target format.
pub fn build_converter(native: &AudioFormat, target: &AudioFormat) -> Result<Option<Converter>, EngineError> {
    native.validate()?;
    target.validate()?;
    if !needs_conversion(native, target) {
        return Ok(None);
    }
    Converter::new(*native, *target).map(Some)
}

/// Anti-alias cutoff as a fraction of the target Nyquist frequency.
const CUTOFF_FRACTION: f64 = 0.9;
const MIN_TAPS: usize = 31;
const MAX_TAPS: usize = 127;

/// Odd tap count that grows with the decimation ratio.
fn anti_alias_taps(step: f64) -> usize {
    let taps = ((step * 16.0).ceil() as usize).clamp(MIN_TAPS, MAX_TAPS);
    taps | 1
}

/// Hamming-windowed sinc low-pass taps with unity DC gain.
///
/// `cutoff` is normalized to the input rate (0.5 = Nyquist).
fn design_low_pass(cutoff: f64, taps: usize) -> Vec<f32> {
    let m = (taps - 1) as f64;
    let mut coeffs: Vec<f64> = (0..taps)
        .map(|n| {
            let centered = n as f64 - m / 2.0;
            let sinc = if centered == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * PI * cutoff * centered).sin() / (PI * centered)
            };
            let window = 0.54 - 0.46 * (2.0 * PI * n as f64 / m).cos();
            sinc * window
        })
        .collect();

    let gain: f64 = coeffs.iter().sum();
    for c in &mut coeffs {
        *c /= gain;
    }
    coeffs.into_iter().map(|c| c as f32).collect()
}

/// Streaming FIR filter; the last `taps - 1` inputs carry over between
/// buffers.
#[derive(Debug)]
struct LowPass {
    coeffs: Vec<f32>,
    /// Carried history followed by the current buffer.
    window: Vec<f32>,
}

impl LowPass {
    fn new(cutoff: f64, taps: usize, capacity: usize) -> Self {
        let mut window = Vec::with_capacity(capacity + taps);
        window.resize(taps - 1, 0.0);
        Self {
            coeffs: design_low_pass(cutoff, taps),
            window,
        }
    }

    /// Filter `samples` in place.
    fn process(&mut self, samples: &mut [f32]) {
        let history = self.coeffs.len() - 1;
        self.window.extend_from_slice(samples);
        for (n, out) in samples.iter_mut().enumerate() {
            // Symmetric taps, so direction does not matter.
            *out = self.coeffs
                .iter()
                .zip(&self.window[n..n + self.coeffs.len()])
                .map(|(c, x)| c * x)
                .sum();
        }
        let keep_from = self.window.len() - history;
        self.window.copy_within(keep_from.., 0);
        self.window.truncate(history);
    }
}

/// Streaming downmix + linear-interpolation rate converter.
///
/// The fractional read position and the last mono frame are carried across
/// buffers so output length tracks `frames * target_rate / native_rate`
/// without per-buffer rounding drift.
#[derive(Debug)]
pub struct Converter {
    native: AudioFormat,
    target: AudioFormat,
    /// Native frames advanced per output frame.
    step: f64,
    /// Read position relative to the first frame of the next buffer.
    position: f64,
    /// Last mono frame of the previous buffer (index -1).
    previous: f32,
    /// Present only when downsampling.
    anti_alias: Option<LowPass>,
    mono: Vec<f32>,
    output: Vec<f32>,
}

impl Converter {
    pub fn new(native: AudioFormat, target: AudioFormat) -> Result<Self, EngineError> {
        native.validate()?;
        target.validate()?;
        if target.channel_count != 1 || target.representation != SampleRepresentation::Float32 {
            return Err(EngineError::FormatUnsupported(format!(
                "conversion target must be mono float, got {}",
                target
            )));
        }

        let step = native.sample_rate as f64 / target.sample_rate as f64;
        let anti_alias = (step > 1.0).then(|| {
            let cutoff = CUTOFF_FRACTION * 0.5 / step;
            LowPass::new(cutoff, anti_alias_taps(step), native.sample_rate as usize)
        });

        Ok(Self {
            native,
            target,
            step,
            position: 0.0,
            previous: 0.0,
            anti_alias,
            mono: Vec::with_capacity(native.sample_rate as usize),
            output: Vec::with_capacity(target.sample_rate as usize + 16),
        })
    }

    /// Convert one interleaved native buffer.
    ///
    /// Returns `None` for buffers that do not match the native format; the
    /// caller drops them.
    pub fn convert(&mut self, samples: NativeSamples<'_>) -> Option<&[f32]> {
        if samples.representation() != self.native.representation {
            log::debug!(
                "dropping buffer: expected {:?} samples, got {:?}",
                self.native.representation,
                samples.representation()
            );
            return None;
        }

        let channels = self.native.channel_count as usize;
        if samples.len() % channels != 0 {
            log::debug!(
                "dropping buffer: {} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            );
            return None;
        }

        self.downmix(&samples, channels);

        if self.native.sample_rate == self.target.sample_rate {
            return Some(&self.mono);
        }

        if let Some(filter) = self.anti_alias.as_mut() {
            filter.process(&mut self.mono);
        }
        self.resample();
        Some(&self.output)
    }

    fn downmix(&mut self, samples: &NativeSamples<'_>, channels: usize) {
        self.mono.clear();
        let frames = samples.len() / channels;
        if channels == 1 {
            self.mono.extend((0..frames).map(|i| samples.normalized(i)));
            return;
        }

        let scale = 1.0 / channels as f32;
        for frame in 0..frames {
            let base = frame * channels;
            let mut sum = 0.0f32;
            for ch in 0..channels {
                sum += samples.normalized(base + ch);
            }
            self.mono.push(sum * scale);
        }
    }

    fn resample(&mut self) {
        self.output.clear();
        let frames = self.mono.len();
        if frames == 0 {
            return;
        }

        let last = (frames - 1) as f64;
        let mut t = self.position;
        while t < last {
            let index = t.floor();
            let fraction = (t - index) as f32;
            let index = index as isize;

            let a = if index < 0 {
                self.previous
            } else {
                self.mono[index as usize]
            };
            let b = self.mono[(index + 1) as usize];
            self.output.push(a + (b - a) * fraction);
            t += self.step;
        }

        self.position = t - frames as f64;
        self.previous = self.mono[frames - 1];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn format(rate: u32, channels: u16, repr: SampleRepresentation) -> AudioFormat {
        AudioFormat::new(rate, channels, repr)
    }

    #[test]
    fn target_needs_no_converter() {
        let target = build_target_format();
        assert!(!needs_conversion(&target, &target));
        assert!(build_converter(&target, &target).unwrap().is_none());
    }

    #[test]
    fn degenerate_native_rate_fails_to_build() {
        let native = format(0, 2, SampleRepresentation::Float32);
        let result = build_converter(&native, &build_target_format());
        assert!(matches!(result, Err(EngineError::FormatUnsupported(_))));
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let native = format(16_000, 2, SampleRepresentation::Float32);
        let mut converter = build_converter(&native, &build_target_format()).unwrap().unwrap();

        let stereo = [0.2, 0.8, 0.4, 0.6, -1.0, 1.0];
        let mono = converter.convert(NativeSamples::Float32(&stereo)).unwrap();
        assert_eq!(mono.len(), 3);
        assert_abs_diff_eq!(mono[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(mono[1], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(mono[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn int16_input_is_normalized() {
        let native = format(16_000, 1, SampleRepresentation::Int16);
        let mut converter = build_converter(&native, &build_target_format()).unwrap().unwrap();

        let pcm = [16_384i16, -16_384];
        let out = converter.convert(NativeSamples::Int16(&pcm)).unwrap();
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn mismatched_representation_is_dropped() {
        let native = format(48_000, 1, SampleRepresentation::Int16);
        let mut converter = build_converter(&native, &build_target_format()).unwrap().unwrap();
        assert!(converter.convert(NativeSamples::Float32(&[0.1, 0.2])).is_none());
    }

    #[test]
    fn ragged_frame_is_dropped() {
        let native = format(48_000, 2, SampleRepresentation::Float32);
        let mut converter = build_converter(&native, &build_target_format()).unwrap().unwrap();
        assert!(converter.convert(NativeSamples::Float32(&[0.1, 0.2, 0.3])).is_none());
    }

    #[test]
    fn downsampling_tracks_rate_ratio_across_buffers() {
        let native = format(48_000, 2, SampleRepresentation::Float32);
        let mut converter = build_converter(&native, &build_target_format()).unwrap().unwrap();

        // One second of 48 kHz stereo in 441-frame chunks (awkward on purpose).
        let chunk = vec![0.25f32; 441 * 2];
        let mut total = 0usize;
        let mut frames = 0usize;
        while frames + 441 <= 48_000 {
            total += converter.convert(NativeSamples::Float32(&chunk)).unwrap().len();
            frames += 441;
        }
        let expected = frames / 3;
        assert!((total as i64 - expected as i64).abs() <= 1, "got {} want ~{}", total, expected);
    }

    #[test]
    fn upsampling_interpolates_linearly() {
        let native = format(8_000, 1, SampleRepresentation::Float32);
        let mut converter = build_converter(&native, &build_target_format()).unwrap().unwrap();

        let out = converter.convert(NativeSamples::Float32(&[0.0, 1.0, 0.0])).unwrap().to_vec();
        // Positions 0.0, 0.5, 1.0, 1.5 → 0.0, 0.5, 1.0, 0.5
        assert_eq!(out.len(), 4);
        assert_abs_diff_eq!(out[1], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[2], 1.0, epsilon = 1e-6);

        // Next buffer starts at the carried frame instead of restarting at 0.
        let next = converter.convert(NativeSamples::Float32(&[1.0, 1.0])).unwrap().to_vec();
        assert_eq!(next.len(), 4);
        assert_abs_diff_eq!(next[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(next[1], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(next[2], 1.0, epsilon = 1e-6);
    }

    fn tone_rms_after_downsampling(frequency: f64) -> f32 {
        let native = format(48_000, 1, SampleRepresentation::Float32);
        let mut converter = build_converter(&native, &build_target_format()).unwrap().unwrap();

        let tone: Vec<f32> = (0..48_000)
            .map(|i| (0.5 * (2.0 * PI * frequency * i as f64 / 48_000.0).sin()) as f32)
            .collect();
        let mut out = Vec::new();
        for chunk in tone.chunks(480) {
            out.extend_from_slice(converter.convert(NativeSamples::Float32(chunk)).unwrap());
        }

        // Skip the filter's start-up transient.
        let settled = &out[200..];
        (settled.iter().map(|s| s * s).sum::<f32>() / settled.len() as f32).sqrt()
    }

    #[test]
    fn out_of_band_tone_is_attenuated_when_downsampling() {
        let rms = tone_rms_after_downsampling(20_000.0);
        assert!(rms < 0.02, "20 kHz tone leaked through at rms {}", rms);
    }

    #[test]
    fn speech_band_tone_survives_downsampling() {
        let rms = tone_rms_after_downsampling(1_000.0);
        assert_abs_diff_eq!(rms, 0.3536, epsilon = 0.02);
    }

    #[test]
    fn low_pass_has_unity_dc_gain_and_odd_length() {
        let taps = anti_alias_taps(3.0);
        assert_eq!(taps % 2, 1);
        let coeffs = design_low_pass(0.15, taps);
        assert_abs_diff_eq!(coeffs.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        assert!(anti_alias_taps(1.1) >= MIN_TAPS);
        assert!(anti_alias_taps(48.0) <= MAX_TAPS);
    }

    #[test]
    fn empty_buffer_yields_empty_output() {
        let native = format(44_100, 1, SampleRepresentation::Float32);
        let mut converter = build_converter(&native, &build_target_format()).unwrap().unwrap();
        assert!(converter.convert(NativeSamples::Float32(&[])).unwrap().is_empty());
    }
}
