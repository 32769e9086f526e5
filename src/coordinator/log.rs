//! Remote log forwarding.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::RemoteConfig;
use crate::coordinator::client::CoordinatorClient;

/// Entries buffered before the policy is known. Oldest drop first.
const MAX_BUFFERED: usize = 256;

/// Log severity on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct Policy {
    forward: bool,
    include_debug: bool,
}

impl Policy {
    fn allows(&self, level: LogLevel) -> bool {
        self.forward && (level != LogLevel::Debug || self.include_debug)
    }
}

#[derive(Default)]
struct LoggerState {
    policy: Option<Policy>,
    buffer: Vec<(LogLevel, String)>,
}

/// Forwards worker logs to the coordinator.
///
/// Until remote config arrives the policy is unknown, so entries buffer;
/// applying the config flushes them under the decided policy or drops
/// them. Forwarding is fire-and-forget: a lost log entry never stalls
/// the worker.
#[derive(Clone)]
pub struct RemoteLogger {
    client: CoordinatorClient,
    state: Arc<Mutex<LoggerState>>,
}

impl RemoteLogger {
    pub fn new(client: CoordinatorClient) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(LoggerState::default())),
        }
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.state.lock().await;
        match state.policy {
            None => {
                if state.buffer.len() >= MAX_BUFFERED {
                    state.buffer.remove(0);
                }
                state.buffer.push((level, message));
            }
            Some(policy) => {
                drop(state);
                if policy.allows(level) {
                    self.send(level, message);
                }
            }
        }
    }

    /// Apply the coordinator's policy and settle the buffer.
    pub async fn apply_remote_config(&self, remote: &RemoteConfig) {
        let policy = Policy {
            forward: remote.enable_comprehensive_logging,
            include_debug: remote.log_debug,
        };

        let mut state = self.state.lock().await;
        state.policy = Some(policy);
        let buffered = std::mem::take(&mut state.buffer);
        drop(state);

        if !policy.forward {
            return;
        }
        for (level, message) in buffered {
            if policy.allows(level) {
                self.send(level, message);
            }
        }
    }

    fn send(&self, level: LogLevel, message: String) {
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(e) = client.post_log(level.as_str(), &message).await {
                tracing::debug!(error = %e, "log forward failed");
            }
        });
    }

    #[cfg(test)]
    async fn buffered(&self) -> usize {
        self.state.lock().await.buffer.len()
    }
}
