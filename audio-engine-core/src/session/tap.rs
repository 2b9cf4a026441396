//! The real-time tap: convert → meter → (optionally) capture.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::models::audio_format::NativeSamples;
use crate::processing::format_converter::Converter;
use crate::processing::level_monitor::LevelMonitor;
use crate::traits::audio_backend::InputCallback;

use super::shared::{CaptureSlot, SharedStatus};

/// Per-graph callback state, built on the control thread and moved into the
/// backend's real-time thread. Nothing here allocates per buffer.
pub(crate) struct TapProcessor {
    converter: Option<Converter>,
    monitor: LevelMonitor,
    status: Arc<SharedStatus>,
    capture: CaptureSlot,
}

impl TapProcessor {
    pub fn new(converter: Option<Converter>, status: Arc<SharedStatus>, capture: CaptureSlot) -> Self {
        Self {
            converter,
            monitor: LevelMonitor::new(),
            status,
            capture,
        }
    }

    pub fn process(&mut self, samples: NativeSamples<'_>) {
        let converted: &[f32] = match self.converter.as_mut() {
            Some(converter) => match converter.convert(samples) {
                Some(out) => out,
                None => return,
            },
            None => match samples {
                NativeSamples::Float32(s) => s,
                other => {
                    log::debug!("dropping {:?} buffer on a float passthrough graph", other.representation());
                    return;
                }
            },
        };

        self.monitor.accumulate(converted);
        if let Some(level) = self.monitor.maybe_emit_level() {
            self.status.publish_level(level);
        }

        if let Some(session) = self.capture.lock().as_mut() {
            session.writer.append(converted);
        }
    }

    /// Wrap into a backend callback. A panic drops that buffer only.
    pub fn into_callback(mut self) -> InputCallback {
        Box::new(move |samples: NativeSamples<'_>| {
            if panic::catch_unwind(AssertUnwindSafe(|| self.process(samples))).is_err() {
                log::debug!("audio tap panicked; buffer dropped");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_format::{AudioFormat, SampleRepresentation};
    use crate::processing::format_converter::build_converter;
    use crate::processing::level_monitor::LEVEL_WINDOW_SAMPLES;
    use crate::session::shared::CaptureSession;
    use crate::storage::capture_writer::CaptureWriter;
    use parking_lot::Mutex;
    use std::time::Instant;

    fn processor(native: AudioFormat) -> (TapProcessor, Arc<SharedStatus>, CaptureSlot) {
        let status = Arc::new(SharedStatus::default());
        let slot: CaptureSlot = Arc::new(Mutex::new(None));
        let converter = build_converter(&native, &AudioFormat::target()).unwrap();
        let tap = TapProcessor::new(converter, Arc::clone(&status), Arc::clone(&slot));
        (tap, status, slot)
    }

    fn attach_session(status: &SharedStatus, slot: &CaptureSlot) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tap_test_{}.wav", uuid::Uuid::new_v4()));
        let writer = CaptureWriter::create(path.clone(), AudioFormat::target(), status.sample_counter()).unwrap();
        *slot.lock() = Some(CaptureSession {
            id: uuid::Uuid::new_v4(),
            writer,
            started_at: Instant::now(),
            created_at: chrono::Utc::now(),
            device_switches: 0,
        });
        path
    }

    #[test]
    fn passthrough_publishes_level_without_capture() {
        let (mut tap, status, _slot) = processor(AudioFormat::target());
        assert_eq!(status.level(), 0);

        tap.process(NativeSamples::Float32(&vec![0.1; LEVEL_WINDOW_SAMPLES]));
        assert_eq!(status.level(), 30);
        assert_eq!(status.sample_count(), 0);
    }

    #[test]
    fn captured_samples_are_in_target_rate() {
        let native = AudioFormat::new(48_000, 2, SampleRepresentation::Float32);
        let (mut tap, status, slot) = processor(native);
        let path = attach_session(&status, &slot);

        // 100 ms of 48 kHz stereo in 10 ms buffers.
        let buffer = vec![0.2f32; 480 * 2];
        for _ in 0..10 {
            tap.process(NativeSamples::Float32(&buffer));
        }
        let count = status.sample_count();
        assert!((1_598..=1_600).contains(&count), "count {}", count);

        slot.lock().take().unwrap().writer.discard();
        assert!(!path.exists());
    }

    #[test]
    fn failing_capture_keeps_metering_and_retrying() {
        let (mut tap, status, slot) = processor(AudioFormat::target());
        let path = attach_session(&status, &slot);
        slot.lock().as_mut().unwrap().writer.close_file();

        let buffer = vec![0.2f32; LEVEL_WINDOW_SAMPLES];
        for round in 1..=3u64 {
            tap.process(NativeSamples::Float32(&buffer));
            assert_eq!(slot.lock().as_ref().unwrap().writer.write_failures(), round);
            assert_eq!(status.level(), 60);
        }
        assert_eq!(status.sample_count(), 0);

        slot.lock().take().unwrap().writer.discard();
        assert!(!path.exists());
    }

    #[test]
    fn wrong_representation_on_passthrough_is_dropped() {
        let (mut tap, status, _slot) = processor(AudioFormat::target());
        tap.process(NativeSamples::Int16(&vec![i16::MAX; LEVEL_WINDOW_SAMPLES]));
        assert_eq!(status.level(), 0);
    }

    #[test]
    fn callback_wrapper_feeds_processor() {
        let (tap, status, _slot) = processor(AudioFormat::target());
        let mut callback = tap.into_callback();
        callback(NativeSamples::Float32(&vec![1.0; LEVEL_WINDOW_SAMPLES]));
        assert_eq!(status.level(), 100);
    }
}
