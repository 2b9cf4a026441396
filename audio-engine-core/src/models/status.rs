use serde::Serialize;

use super::state::EngineState;

/// Point-in-time view of the engine, cheap to build from any thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub device: Option<String>,
    pub level: u8,
    pub duration_ms: u64,
    pub sample_count: u64,
    pub last_error: Option<String>,
}
