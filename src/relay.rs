//! Relays the bridge's copy of a response stream to the coordinator.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::{ConnectionError, HostError};
use crate::job::TaskOutcome;

/// In-band marker the coordinator's upstream plants inside a chunk when
/// the request failed mid-stream.
pub const STREAM_ERROR_MARKER: &str = r#""type": "stream_error""#;

/// Terminal marker closing a relayed stream on duplex channels.
pub const TERMINAL_MARKER: &str = "[DONE]";

/// Decoded chunks of the bridge's copy of a response. The page renders
/// its own copy independently.
pub type ChunkStream = Pin<Box<dyn Stream<Item = std::result::Result<String, HostError>> + Send>>;

/// Where relayed output goes: one forward per chunk plus a single
/// terminal report. One implementation per channel flavor.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn forward_chunk(&self, chunk: &str) -> std::result::Result<(), ConnectionError>;
    async fn forward_error(&self, message: &str) -> std::result::Result<(), ConnectionError>;
    async fn finish(&self, outcome: TaskOutcome) -> std::result::Result<(), ConnectionError>;
}

/// Drain `stream` into `sink` in arrival order, each chunk forwarded
/// exactly once, then report the outcome. The error marker stops reading
/// immediately after its chunk is forwarded; a broken read or a failed
/// forward also fails the task. The terminal report happens exactly once
/// and never before the read loop has exited.
pub async fn relay_response(
    task_id: &str,
    mut stream: ChunkStream,
    sink: &dyn ResultSink,
) -> TaskOutcome {
    let mut outcome = TaskOutcome::Completed;

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                if let Err(e) = sink.forward_chunk(&chunk).await {
                    tracing::warn!(task_id, error = %e, "chunk forward failed, ending relay");
                    outcome = TaskOutcome::Failed;
                    break;
                }
                if chunk.contains(STREAM_ERROR_MARKER) {
                    tracing::warn!(task_id, "error marker in stream, ending relay");
                    outcome = TaskOutcome::Failed;
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(task_id, error = %e, "response stream broke");
                outcome = TaskOutcome::Failed;
                break;
            }
        }
    }

    report(task_id, sink, outcome).await;
    outcome
}

/// Terminal failure for a task that never produced a stream: forward the
/// error payload, then report failed. Exactly two upstream emissions.
pub async fn fail_task(task_id: &str, sink: &dyn ResultSink, message: &str) {
    if let Err(e) = sink.forward_error(message).await {
        tracing::warn!(task_id, error = %e, "failed to forward error payload");
    }
    report(task_id, sink, TaskOutcome::Failed).await;
}

async fn report(task_id: &str, sink: &dyn ResultSink, outcome: TaskOutcome) {
    tracing::info!(task_id, %outcome, "task finished");
    if let Err(e) = sink.finish(outcome).await {
        // Cleanup proceeds regardless, or the worker would stay busy forever.
        tracing::error!(task_id, error = %e, "failed to report terminal status");
    }
}
