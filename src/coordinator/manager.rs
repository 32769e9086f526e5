//! Connection lifecycle: link state plus the single reconnect pause.

use std::time::Duration;

/// Link lifecycle. At most one reconnect timer can ever be pending
/// because the only route back to `Connecting` runs through
/// `WaitingRetry`, and the pause is taken inline by the owning loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Down,
    Connecting,
    Up,
    WaitingRetry,
}

impl LinkState {
    pub fn can_transition_to(&self, target: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, target),
            (Down, Connecting)
                | (Connecting, Up)
                | (Connecting, WaitingRetry)
                | (Up, WaitingRetry)
                | (WaitingRetry, Connecting)
                | (Connecting, Down)
                | (Up, Down)
                | (WaitingRetry, Down)
        )
    }

    pub fn is_up(&self) -> bool {
        matches!(self, LinkState::Up)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Down => "down",
            LinkState::Connecting => "connecting",
            LinkState::Up => "up",
            LinkState::WaitingRetry => "waiting_retry",
        };
        write!(f, "{s}")
    }
}

/// Tracks the channel link and owns reconnect pacing. Every reconnect
/// waits the same fixed delay; there is no backoff growth.
pub struct ConnectionManager {
    state: LinkState,
    reconnect_delay: Duration,
}

impl ConnectionManager {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: LinkState::Down,
            reconnect_delay,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn connecting(&mut self) {
        self.transition(LinkState::Connecting);
    }

    pub fn established(&mut self) {
        self.transition(LinkState::Up);
    }

    pub fn shutdown(&mut self) {
        self.transition(LinkState::Down);
    }

    /// Mark the link lost and take the one reconnect pause.
    pub async fn pause_before_retry(&mut self) {
        self.transition(LinkState::WaitingRetry);
        tokio::time::sleep(self.reconnect_delay).await;
    }

    fn transition(&mut self, target: LinkState) {
        if self.state == target {
            return;
        }
        if !self.state.can_transition_to(target) {
            tracing::warn!(from = %self.state, to = %target, "irregular link transition");
        } else {
            tracing::debug!(from = %self.state, to = %target, "link transition");
        }
        self.state = target;
    }
}
