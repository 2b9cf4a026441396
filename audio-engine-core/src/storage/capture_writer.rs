use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::models::audio_format::{AudioFormat, SampleRepresentation};
use crate::models::error::EngineError;
use crate::processing::wav_format;

const WRITE_BUFFER_BYTES: usize = 64 * 1024;
const BYTES_PER_SAMPLE: u64 = 4;

/// Streaming WAV writer for the capture backing store.
///
/// Called from the real-time tap, so writes go through a `BufWriter` and most
/// appends are a memcpy. The written-sample count is mirrored into a shared
/// atomic so status queries never touch the writer.
///
/// ## File Format
/// ```text
/// [44-byte WAV header, IEEE float]
/// [f32 little-endian samples, mono, 16 kHz...]
/// ```
pub struct CaptureWriter {
    file_path: PathBuf,
    format: AudioFormat,
    file: Option<BufWriter<File>>,
    samples_written: Arc<AtomicU64>,
    write_failures: u64,
    scratch: Vec<u8>,
}

/// A closed capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedCapture {
    pub file_path: PathBuf,
    pub sample_count: u64,
    pub checksum: String,
}

impl CaptureWriter {
    /// Create the file and write a placeholder header.
    ///
    /// `samples_written` is reset to 0 and then tracks every sample that
    /// reached the file buffer.
    pub fn create(
        file_path: PathBuf,
        format: AudioFormat,
        samples_written: Arc<AtomicU64>,
    ) -> Result<Self, EngineError> {
        if format.representation != SampleRepresentation::Float32 || format.channel_count != 1 {
            return Err(EngineError::FormatUnsupported(format!(
                "capture files are mono float, got {}",
                format
            )));
        }

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| EngineError::StorageError(format!("failed to create directory: {}", e)))?;
        }

        let file = File::create(&file_path)
            .map_err(|e| EngineError::StorageError(format!("failed to create file: {}", e)))?;
        let mut file = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);

        let header = wav_format::header_for(&format, 0);
        file.write_all(&header)
            .map_err(|e| EngineError::StorageError(format!("failed to write header: {}", e)))?;

        samples_written.store(0, Ordering::Relaxed);

        Ok(Self {
            file_path,
            format,
            file: Some(file),
            samples_written,
            write_failures: 0,
            scratch: Vec::with_capacity(WRITE_BUFFER_BYTES),
        })
    }

    /// Append samples; failures are logged and counted, never returned.
    ///
    /// The capture simply ends up shorter than the session.
    pub fn append(&mut self, samples: &[f32]) {
        if let Err(e) = self.write(samples) {
            self.write_failures += 1;
            if self.write_failures == 1 {
                log::error!("capture write failed for {}: {}", self.file_path.display(), e);
            } else {
                log::debug!("capture write failed ({} so far): {}", self.write_failures, e);
            }
        }
    }

    /// Append samples, reporting failure.
    pub fn write(&mut self, samples: &[f32]) -> Result<(), EngineError> {
        if samples.is_empty() {
            return Ok(());
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| EngineError::StorageError("file is not open".into()))?;

        self.scratch.clear();
        for &sample in samples {
            self.scratch.extend_from_slice(&sample.to_le_bytes());
        }
        file.write_all(&self.scratch)
            .map_err(|e| EngineError::StorageError(format!("write failed: {}", e)))?;

        self.samples_written
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Flush, patch the header sizes and compute a SHA-256 of the file.
    ///
    /// Sizes come from the file on disk, so a partially failed write is
    /// trimmed to whole samples rather than trusted.
    pub fn finalize(mut self) -> Result<FinalizedCapture, EngineError> {
        let writer = self
            .file
            .take()
            .ok_or_else(|| EngineError::StorageError("file is not open".into()))?;
        let mut file = writer
            .into_inner()
            .map_err(|e| EngineError::StorageError(format!("flush failed: {}", e.error())))?;

        let file_len = file
            .seek(SeekFrom::End(0))
            .map_err(|e| EngineError::StorageError(e.to_string()))?;
        let data_bytes = file_len.saturating_sub(wav_format::WAV_HEADER_SIZE as u64);
        let sample_count = data_bytes / BYTES_PER_SAMPLE;
        let data_bytes = sample_count * BYTES_PER_SAMPLE;
        let total_len = wav_format::WAV_HEADER_SIZE as u64 + data_bytes;
        if total_len != file_len {
            file.set_len(total_len)
                .map_err(|e| EngineError::StorageError(e.to_string()))?;
        }

        file.seek(SeekFrom::Start(4))
            .map_err(|e| EngineError::StorageError(e.to_string()))?;
        file.write_all(&wav_format::riff_chunk_size(total_len).to_le_bytes())
            .map_err(|e| EngineError::StorageError(e.to_string()))?;

        file.seek(SeekFrom::Start(40))
            .map_err(|e| EngineError::StorageError(e.to_string()))?;
        file.write_all(&wav_format::data_chunk_size(data_bytes).to_le_bytes())
            .map_err(|e| EngineError::StorageError(e.to_string()))?;

        file.flush().map_err(|e| EngineError::StorageError(e.to_string()))?;
        file.sync_all().map_err(|e| EngineError::StorageError(e.to_string()))?;
        drop(file);

        let checksum = sha256_file(&self.file_path)?;

        Ok(FinalizedCapture {
            file_path: self.file_path.clone(),
            sample_count,
            checksum,
        })
    }

    /// Drop the file handle so every later write fails.
    #[cfg(test)]
    pub(crate) fn close_file(&mut self) {
        self.file = None;
    }

    /// Close and delete the file.
    pub fn discard(mut self) {
        self.file = None;
        if let Err(e) = fs::remove_file(&self.file_path) {
            log::warn!("failed to remove discarded capture {}: {}", self.file_path.display(), e);
        }
        self.samples_written.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for CaptureWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureWriter")
            .field("file_path", &self.file_path)
            .field("samples_written", &self.samples_written.load(Ordering::Relaxed))
            .field("write_failures", &self.write_failures)
            .finish()
    }
}

/// Compute SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> Result<String, EngineError> {
    let mut file = File::open(path)
        .map_err(|e| EngineError::StorageError(format!("failed to open file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| EngineError::StorageError(format!("failed to read file for checksum: {}", e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("audio_engine_test_{}_{}", uuid::Uuid::new_v4(), name))
    }

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    }

    #[test]
    fn write_float_wav() {
        let path = temp_file_path("plain.wav");
        let counter = Arc::new(AtomicU64::new(99));
        let mut writer = CaptureWriter::create(path.clone(), AudioFormat::target(), Arc::clone(&counter)).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        writer.append(&[0.0, 0.5, -0.5, 1.0]);
        assert_eq!(counter.load(Ordering::Relaxed), 4);

        let finalized = writer.finalize().unwrap();
        assert_eq!(finalized.sample_count, 4);
        assert_eq!(finalized.checksum.len(), 64);

        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 44 + 16);
        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(u32_at(&data, 40), 16);
        assert_eq!(u32_at(&data, 4), 36 + 16);
        assert_eq!(f32::from_le_bytes([data[48], data[49], data[50], data[51]]), 0.5);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn checksum_is_stable_for_identical_content() {
        let a = temp_file_path("a.wav");
        let b = temp_file_path("b.wav");
        let mut sums = Vec::new();
        for path in [&a, &b] {
            let mut writer =
                CaptureWriter::create(path.clone(), AudioFormat::target(), Arc::new(AtomicU64::new(0))).unwrap();
            writer.append(&[0.25; 100]);
            sums.push(writer.finalize().unwrap().checksum);
        }
        assert_eq!(sums[0], sums[1]);
        fs::remove_file(&a).ok();
        fs::remove_file(&b).ok();
    }

    #[test]
    fn discard_removes_file() {
        let path = temp_file_path("discard.wav");
        let counter = Arc::new(AtomicU64::new(0));
        let mut writer = CaptureWriter::create(path.clone(), AudioFormat::target(), Arc::clone(&counter)).unwrap();
        writer.append(&[0.1; 32]);
        writer.discard();
        assert!(!path.exists());
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn write_failures_are_counted_and_swallowed() {
        let path = temp_file_path("failing.wav");
        let counter = Arc::new(AtomicU64::new(0));
        let mut writer = CaptureWriter::create(path.clone(), AudioFormat::target(), Arc::clone(&counter)).unwrap();
        writer.append(&[0.1; 160]);
        writer.close_file();

        assert!(matches!(writer.write(&[0.1; 160]), Err(EngineError::StorageError(_))));
        writer.append(&[0.1; 160]);
        writer.append(&[0.1; 160]);
        assert_eq!(writer.write_failures(), 2);
        assert_eq!(counter.load(Ordering::Relaxed), 160);

        writer.discard();
        assert!(!path.exists());
    }

    #[test]
    fn rejects_non_target_format() {
        let path = temp_file_path("stereo.wav");
        let format = AudioFormat::new(48_000, 2, SampleRepresentation::Float32);
        let result = CaptureWriter::create(path.clone(), format, Arc::new(AtomicU64::new(0)));
        assert!(matches!(result, Err(EngineError::FormatUnsupported(_))));
        assert!(!path.exists());
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = std::env::temp_dir().join(format!("audio_engine_dir_{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("capture.wav");
        let writer = CaptureWriter::create(path.clone(), AudioFormat::target(), Arc::new(AtomicU64::new(0))).unwrap();
        writer.finalize().unwrap();
        assert!(path.exists());
        fs::remove_dir_all(&dir).ok();
    }
}
