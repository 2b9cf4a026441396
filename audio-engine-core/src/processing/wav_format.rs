//! WAV file layout for capture files.
//!
//! Generates the standard 44-byte RIFF header and provides helpers for
//! patching size fields once a capture is finalized.

use crate::models::audio_format::{AudioFormat, SampleRepresentation};

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// `WAVE_FORMAT_PCM`
pub const FORMAT_PCM: u16 = 1;

/// `WAVE_FORMAT_IEEE_FLOAT`
pub const FORMAT_IEEE_FLOAT: u16 = 3;

/// Format code for a sample representation.
pub fn format_tag(representation: SampleRepresentation) -> u16 {
    match representation {
        SampleRepresentation::Float32 => FORMAT_IEEE_FLOAT,
        SampleRepresentation::Int16 | SampleRepresentation::Int32 => FORMAT_PCM,
    }
}

/// Header for a stream in `format` with `data_size` bytes of samples.
pub fn header_for(format: &AudioFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    generate_wav_header(
        format.sample_rate,
        format.representation.bits_per_sample(),
        format.channel_count,
        format_tag(format.representation),
        data_size,
    )
}

/// Generate a 44-byte WAV RIFF header, little-endian.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    file size - 8 (36 + data_size)
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (format chunk size)
/// [20-21]  format code (1 = PCM, 3 = IEEE float)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bit_depth / 8
/// [32-33]  block_align = channels * bit_depth / 8
/// [34-35]  bit_depth
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(
    sample_rate: u32,
    bit_depth: u16,
    channels: u16,
    format_code: u16,
    data_size: u32,
) -> [u8; WAV_HEADER_SIZE] {
    let byte_rate = sample_rate * channels as u32 * bit_depth as u32 / 8;
    let block_align = channels * bit_depth / 8;
    let chunk_size = 36u32.saturating_add(data_size);

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format_code.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bit_depth.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// RIFF chunk size field (offset 4) for a file of `total_file_size` bytes.
pub fn riff_chunk_size(total_file_size: u64) -> u32 {
    total_file_size.saturating_sub(8).min(u32::MAX as u64) as u32
}

/// Data size field (offset 40), saturating at the 4 GiB WAV limit.
pub fn data_chunk_size(data_size: u64) -> u32 {
    data_size.min(u32::MAX as u64) as u32
}

/// Patch the file-size field at offset 4.
pub fn patch_file_size(header: &mut [u8], total_file_size: u64) {
    header[4..8].copy_from_slice(&riff_chunk_size(total_file_size).to_le_bytes());
}

/// Patch the data-size field at offset 40.
pub fn patch_data_size(header: &mut [u8], data_size: u64) {
    header[40..44].copy_from_slice(&data_chunk_size(data_size).to_le_bytes());
}
