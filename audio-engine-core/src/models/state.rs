use serde::Serialize;

/// Engine lifecycle state.
///
/// State transitions:
/// ```text
/// idle ──start──→ running ──start_capture──→ running_and_capturing
///  ↑                │  ↑                          │
///  └──────stop──────┘  └───────stop_capture───────┘
///  ↑                                              │
///  └──────────────────stop (discards capture)─────┘
/// ```
/// A device switch keeps the state it started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    RunningAndCapturing,
}

impl EngineState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        !self.is_idle()
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::RunningAndCapturing)
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_follow_variants() {
        assert!(EngineState::Idle.is_idle());
        assert!(!EngineState::Idle.is_running());
        assert!(EngineState::Running.is_running());
        assert!(!EngineState::Running.is_capturing());
        assert!(EngineState::RunningAndCapturing.is_running());
        assert!(EngineState::RunningAndCapturing.is_capturing());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&EngineState::RunningAndCapturing).unwrap();
        assert_eq!(json, "\"running_and_capturing\"");
    }
}
