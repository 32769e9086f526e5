//! Error types for the tab bridge.

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Identity lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Message chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Host page error: {0}")]
    Host(#[from] HostError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Lease thresholds out of order: renewal {renewal_ms}ms, busy {busy_ms}ms, gc {gc_ms}ms")]
    ThresholdOrder {
        renewal_ms: u64,
        busy_ms: u64,
        gc_ms: u64,
    },

    #[error("Failed to load remote config: {reason}")]
    RemoteLoadFailed { reason: String },
}

/// Identity lease and registry errors.
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("Failed to read lease registry: {reason}")]
    ReadFailed { reason: String },

    #[error("Failed to write lease registry: {reason}")]
    WriteFailed { reason: String },

    #[error("Lease registry is corrupt: {reason}")]
    Corrupt { reason: String },
}

/// Coordinator connection errors, both HTTP and channel-level.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Unexpected status {status} from {url}")]
    BadStatus { status: u16, url: String },

    #[error("Endpoint discovery returned no usable port (status: {status})")]
    EndpointUnavailable { status: String },

    #[error("Websocket handshake with {url} failed: {reason}")]
    HandshakeFailed { url: String, reason: String },

    #[error("Channel closed: {reason}")]
    ChannelClosed { reason: String },

    #[error("Failed to send on duplex channel: {reason}")]
    SendFailed { reason: String },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

/// Job intake errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Failed to fetch job: {reason}")]
    FetchFailed { reason: String },

    #[error("Worker busy with task {active}, rejected task {rejected}")]
    WorkerBusy { active: String, rejected: String },
}

/// Message chain construction errors. Both variants are terminal for
/// the task that hit them.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("No session context: the page has not produced an evaluation session yet")]
    MissingSessionContext,

    #[error("Template list is empty")]
    EmptyTemplateList,

    #[error("Request body is not valid JSON: {reason}")]
    MalformedBody { reason: String },
}

/// Host page adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Submit control is disabled")]
    SubmitDisabled,

    #[error("Page request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Response stream broke: {reason}")]
    StreamBroken { reason: String },

    #[error("Injection failed: {reason}")]
    InjectionFailed { reason: String },
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;
