use serde::{Deserialize, Serialize};

use super::error::EngineError;

/// Target sample rate every buffer is normalized to.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Target channel count every buffer is normalized to.
pub const TARGET_CHANNELS: u16 = 1;

const MAX_SAMPLE_RATE: u32 = 768_000;
const MAX_CHANNELS: u16 = 32;

/// How a single sample is encoded in an interleaved buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleRepresentation {
    Float32,
    Int16,
    Int32,
}

impl SampleRepresentation {
    pub fn bits_per_sample(&self) -> u16 {
        match self {
            Self::Float32 | Self::Int32 => 32,
            Self::Int16 => 16,
        }
    }
}

/// Sample rate, channel layout and sample encoding of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub representation: SampleRepresentation,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channel_count: u16, representation: SampleRepresentation) -> Self {
        Self {
            sample_rate,
            channel_count,
            representation,
        }
    }

    /// Mono, 16 kHz, 32-bit float.
    pub const fn target() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            channel_count: TARGET_CHANNELS,
            representation: SampleRepresentation::Float32,
        }
    }

    /// Reject formats no converter can be built for.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(EngineError::FormatUnsupported(format!(
                "sample rate {} Hz",
                self.sample_rate
            )));
        }
        if self.channel_count == 0 || self.channel_count > MAX_CHANNELS {
            return Err(EngineError::FormatUnsupported(format!(
                "channel count {}",
                self.channel_count
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {:?}",
            self.sample_rate, self.channel_count, self.representation
        )
    }
}

/// One interleaved buffer as delivered by the hardware, in its native encoding.
#[derive(Debug, Clone, Copy)]
pub enum NativeSamples<'a> {
    Float32(&'a [f32]),
    Int16(&'a [i16]),
    Int32(&'a [i32]),
}

impl NativeSamples<'_> {
    pub fn representation(&self) -> SampleRepresentation {
        match self {
            Self::Float32(_) => SampleRepresentation::Float32,
            Self::Int16(_) => SampleRepresentation::Int16,
            Self::Int32(_) => SampleRepresentation::Int32,
        }
    }

    /// Number of interleaved samples (frames × channels).
    pub fn len(&self) -> usize {
        match self {
            Self::Float32(s) => s.len(),
            Self::Int16(s) => s.len(),
            Self::Int32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample `index` scaled to `[-1.0, 1.0)`.
    #[inline]
    pub fn normalized(&self, index: usize) -> f32 {
        match self {
            Self::Float32(s) => s[index],
            Self::Int16(s) => s[index] as f32 / 32_768.0,
            Self::Int32(s) => (s[index] as f64 / 2_147_483_648.0) as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_mono_16k_float() {
        let target = AudioFormat::target();
        assert_eq!(target.sample_rate, 16_000);
        assert_eq!(target.channel_count, 1);
        assert_eq!(target.representation, SampleRepresentation::Float32);
        assert!(target.validate().is_ok());
    }

    #[test]
    fn degenerate_rate_is_rejected() {
        let format = AudioFormat::new(0, 2, SampleRepresentation::Float32);
        assert!(matches!(format.validate(), Err(EngineError::FormatUnsupported(_))));
    }

    #[test]
    fn zero_channels_is_rejected() {
        let format = AudioFormat::new(48_000, 0, SampleRepresentation::Int16);
        assert!(matches!(format.validate(), Err(EngineError::FormatUnsupported(_))));
    }

    #[test]
    fn integer_samples_normalize_into_unit_range() {
        let ints = [i16::MIN, 0, 16_384];
        let samples = NativeSamples::Int16(&ints);
        assert_eq!(samples.normalized(0), -1.0);
        assert_eq!(samples.normalized(1), 0.0);
        assert_eq!(samples.normalized(2), 0.5);

        let wide = [i32::MIN, i32::MAX];
        let samples = NativeSamples::Int32(&wide);
        assert_eq!(samples.normalized(0), -1.0);
        assert!(samples.normalized(1) <= 1.0);
    }
}
