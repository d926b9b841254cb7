use serde::{Deserialize, Serialize};

/// What put the current session on hold. Only the mechanism that paused a
/// session is allowed to resume it automatically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PauseReason {
    /// No input for longer than the idle threshold, or the window was hidden.
    Idle,
    /// System suspend or screen lock.
    System,
    /// Explicit caller request; never resumed by a monitor.
    Manual,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseReason::Idle => "idle",
            PauseReason::System => "system",
            PauseReason::Manual => "manual",
        }
    }
}
