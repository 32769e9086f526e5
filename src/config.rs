//! Configuration types.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Which coordinator channel the worker speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    /// Server-push channel: jobs arrive as push events, results go back
    /// over per-endpoint HTTP posts.
    #[default]
    Push,
    /// Duplex channel: work requests and result frames share one websocket.
    Duplex,
}

impl std::str::FromStr for ChannelMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(ChannelMode::Push),
            "duplex" => Ok(ChannelMode::Duplex),
            other => Err(ConfigError::InvalidValue {
                key: "TAB_BRIDGE_CHANNEL".to_string(),
                message: format!("expected 'push' or 'duplex', got '{other}'"),
            }),
        }
    }
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Coordinator base URL, no trailing slash.
    pub coordinator_url: String,
    /// Which channel to run.
    pub channel: ChannelMode,
    /// Identity heartbeat period. Must be shorter than `busy_threshold`.
    pub renewal_period: Duration,
    /// A registry entry renewed within this window marks its identity as claimed.
    pub busy_threshold: Duration,
    /// Registry entries older than this are garbage collected.
    pub gc_threshold: Duration,
    /// Fixed delay before any channel reconnect attempt.
    pub reconnect_delay: Duration,
    /// Delay between retries of the config/endpoint setup phase.
    pub setup_retry_delay: Duration,
    /// Whether to resolve a per-worker push endpoint before connecting.
    pub discover_endpoint: bool,
    /// Pause after typing into the submit box before clicking send.
    pub submit_settle_delay: Duration,
    /// Pause before the single submit retry when the send control is disabled.
    pub submit_retry_delay: Duration,
    /// Interval for the polling fallback. Ignored unless `poll_jobs` is set.
    pub poll_interval: Duration,
    /// Poll for jobs over HTTP instead of relying on push delivery.
    pub poll_jobs: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://127.0.0.1:5102".to_string(),
            channel: ChannelMode::Push,
            renewal_period: Duration::from_secs(2),
            busy_threshold: Duration::from_secs(4),
            gc_threshold: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            setup_retry_delay: Duration::from_secs(5),
            discover_endpoint: false,
            submit_settle_delay: Duration::from_millis(50),
            submit_retry_delay: Duration::from_millis(500),
            poll_interval: Duration::from_secs(3),
            poll_jobs: false,
        }
    }
}

impl BridgeConfig {
    /// Build config from `TAB_BRIDGE_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let coordinator_url = std::env::var("TAB_BRIDGE_COORDINATOR_URL")
            .unwrap_or(defaults.coordinator_url)
            .trim_end_matches('/')
            .to_string();

        let channel = match std::env::var("TAB_BRIDGE_CHANNEL") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.channel,
        };

        let config = Self {
            coordinator_url,
            channel,
            renewal_period: env_millis("TAB_BRIDGE_RENEWAL_MS", defaults.renewal_period),
            busy_threshold: env_millis("TAB_BRIDGE_BUSY_MS", defaults.busy_threshold),
            gc_threshold: env_millis("TAB_BRIDGE_GC_MS", defaults.gc_threshold),
            reconnect_delay: env_millis("TAB_BRIDGE_RECONNECT_MS", defaults.reconnect_delay),
            setup_retry_delay: env_millis("TAB_BRIDGE_SETUP_RETRY_MS", defaults.setup_retry_delay),
            discover_endpoint: env_flag("TAB_BRIDGE_DISCOVER_ENDPOINT", defaults.discover_endpoint),
            submit_settle_delay: env_millis(
                "TAB_BRIDGE_SUBMIT_SETTLE_MS",
                defaults.submit_settle_delay,
            ),
            submit_retry_delay: env_millis(
                "TAB_BRIDGE_SUBMIT_RETRY_MS",
                defaults.submit_retry_delay,
            ),
            poll_interval: env_millis("TAB_BRIDGE_POLL_MS", defaults.poll_interval),
            poll_jobs: env_flag("TAB_BRIDGE_POLL_JOBS", defaults.poll_jobs),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the lease threshold ordering: renewal < busy < gc.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.renewal_period < self.busy_threshold && self.busy_threshold < self.gc_threshold {
            Ok(())
        } else {
            Err(ConfigError::ThresholdOrder {
                renewal_ms: self.renewal_period.as_millis() as u64,
                busy_ms: self.busy_threshold.as_millis() as u64,
                gc_ms: self.gc_threshold.as_millis() as u64,
            })
        }
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

/// Coordinator-issued config, fetched once per session during setup.
///
/// Unknown fields are ignored and missing fields default off, so an older
/// coordinator stays compatible.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteConfig {
    /// Forward worker logs to the coordinator.
    pub enable_comprehensive_logging: bool,
    /// Include debug-level entries when forwarding.
    pub log_debug: bool,
    pub bypass_enabled: bool,
    pub tavern_mode_enabled: bool,
    /// Port of the capture listener for harvested session ids.
    pub api_port: Option<u16>,
}
