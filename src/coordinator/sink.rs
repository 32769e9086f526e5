//! Per-channel result sinks for the stream relay.

use async_trait::async_trait;

use crate::coordinator::client::CoordinatorClient;
use crate::coordinator::duplex::{DuplexHandle, ResultData};
use crate::error::ConnectionError;
use crate::job::TaskOutcome;
use crate::relay::ResultSink;

/// Push-channel sink: chunks ride `POST /stream_chunk`, the outcome rides
/// `POST /report_result`.
pub struct RestSink {
    client: CoordinatorClient,
    task_id: String,
}

impl RestSink {
    pub fn new(client: CoordinatorClient, task_id: impl Into<String>) -> Self {
        Self {
            client,
            task_id: task_id.into(),
        }
    }
}

#[async_trait]
impl ResultSink for RestSink {
    async fn forward_chunk(&self, chunk: &str) -> Result<(), ConnectionError> {
        self.client.post_chunk(&self.task_id, chunk).await
    }

    async fn forward_error(&self, message: &str) -> Result<(), ConnectionError> {
        let payload = serde_json::json!({ "error": message }).to_string();
        self.client.post_chunk(&self.task_id, &payload).await
    }

    async fn finish(&self, outcome: TaskOutcome) -> Result<(), ConnectionError> {
        self.client.report_result(&self.task_id, outcome).await
    }
}

/// Duplex-channel sink: everything rides outbound frames keyed by the
/// request id. The terminal marker is the outcome report; a failure has
/// already shown up as an error frame by the time it is sent.
pub struct DuplexSink {
    handle: DuplexHandle,
    request_id: String,
}

impl DuplexSink {
    pub fn new(handle: DuplexHandle, request_id: impl Into<String>) -> Self {
        Self {
            handle,
            request_id: request_id.into(),
        }
    }
}

#[async_trait]
impl ResultSink for DuplexSink {
    async fn forward_chunk(&self, chunk: &str) -> Result<(), ConnectionError> {
        self.handle
            .send_result(&self.request_id, &ResultData::Chunk(chunk.to_string()))
    }

    async fn forward_error(&self, message: &str) -> Result<(), ConnectionError> {
        self.handle
            .send_result(&self.request_id, &ResultData::Error(message.to_string()))
    }

    async fn finish(&self, _outcome: TaskOutcome) -> Result<(), ConnectionError> {
        self.handle
            .send_result(&self.request_id, &ResultData::Terminal)
    }
}
