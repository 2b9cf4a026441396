use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::state::EngineState;
use crate::models::status::EngineStatus;
use crate::storage::capture_writer::CaptureWriter;

/// Fields read by status queries. Held only for field copies, never across I/O.
#[derive(Debug, Default)]
struct StatusCell {
    state: EngineState,
    device: Option<String>,
    capture_started: Option<Instant>,
    last_error: Option<String>,
}

/// State shared between the control thread, the real-time tap and callers.
///
/// Queries go through this struct only, so they never wait behind a control
/// operation such as a device switch.
#[derive(Debug, Default)]
pub(crate) struct SharedStatus {
    cell: Mutex<StatusCell>,
    level: AtomicU8,
    sample_count: Arc<AtomicU64>,
}

impl SharedStatus {
    pub fn state(&self) -> EngineState {
        self.cell.lock().state
    }

    pub fn set_state(&self, state: EngineState) {
        self.cell.lock().state = state;
    }

    pub fn device(&self) -> Option<String> {
        self.cell.lock().device.clone()
    }

    pub fn set_device(&self, device: Option<String>) {
        self.cell.lock().device = device;
    }

    pub fn last_error(&self) -> Option<String> {
        self.cell.lock().last_error.clone()
    }

    pub fn set_error(&self, message: String) {
        self.cell.lock().last_error = Some(message);
    }

    pub fn clear_error(&self) {
        self.cell.lock().last_error = None;
    }

    pub fn level(&self) -> u8 {
        self.level.load(Ordering::Relaxed)
    }

    pub fn publish_level(&self, level: u8) {
        self.level.store(level, Ordering::Relaxed);
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count.load(Ordering::Relaxed)
    }

    /// Counter the capture writer increments as samples reach the file.
    pub fn sample_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.sample_count)
    }

    pub fn mark_capture_started(&self, started: Instant) {
        let mut cell = self.cell.lock();
        cell.capture_started = Some(started);
        cell.state = EngineState::RunningAndCapturing;
    }

    pub fn mark_capture_stopped(&self, state: EngineState) {
        {
            let mut cell = self.cell.lock();
            cell.capture_started = None;
            cell.state = state;
        }
        self.sample_count.store(0, Ordering::Relaxed);
    }

    pub fn duration_ms(&self) -> u64 {
        self.cell
            .lock()
            .capture_started
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Back to idle: no device, no capture, silent meter.
    pub fn reset_idle(&self) {
        {
            let mut cell = self.cell.lock();
            cell.state = EngineState::Idle;
            cell.device = None;
            cell.capture_started = None;
        }
        self.level.store(0, Ordering::Relaxed);
        self.sample_count.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatus {
        let (state, device, duration_ms, last_error) = {
            let cell = self.cell.lock();
            (
                cell.state,
                cell.device.clone(),
                cell.capture_started
                    .map(|start| start.elapsed().as_millis() as u64)
                    .unwrap_or(0),
                cell.last_error.clone(),
            )
        };
        EngineStatus {
            state,
            device,
            level: self.level(),
            duration_ms,
            sample_count: self.sample_count(),
            last_error,
        }
    }
}

/// One recording attempt. Survives device switches; destroyed by
/// `stop_capture` (finalized) or `stop_engine` (discarded).
#[derive(Debug)]
pub(crate) struct CaptureSession {
    pub id: uuid::Uuid,
    pub writer: CaptureWriter,
    pub started_at: Instant,
    pub created_at: DateTime<Utc>,
    pub device_switches: u32,
}

/// Slot the tap writes through. `None` outside a capture session and while a
/// device switch has the session detached.
pub(crate) type CaptureSlot = Arc<Mutex<Option<CaptureSession>>>;
