//! One-shot capture of the app's session identifiers.

use serde::{Deserialize, Serialize};

/// Capture lifecycle. A coordinator command arms it; the next retry-style
/// call observed while armed reports its ids exactly once, then the mode
/// latches until re-armed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Idle,
    Armed,
    Captured,
}

impl CaptureMode {
    pub fn can_transition_to(&self, target: CaptureMode) -> bool {
        use CaptureMode::*;
        matches!((self, target), (Idle, Armed) | (Captured, Armed) | (Armed, Captured))
    }

    /// Arm the capture. Returns whether the mode changed.
    pub fn arm(&mut self) -> bool {
        if self.can_transition_to(CaptureMode::Armed) {
            *self = CaptureMode::Armed;
            true
        } else {
            false
        }
    }

    /// Latch an observation. Returns true exactly when we were armed.
    pub fn observe(&mut self) -> bool {
        if self.can_transition_to(CaptureMode::Captured) {
            *self = CaptureMode::Captured;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, CaptureMode::Armed)
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CaptureMode::Idle => "idle",
            CaptureMode::Armed => "armed",
            CaptureMode::Captured => "captured",
        };
        write!(f, "{s}")
    }
}
