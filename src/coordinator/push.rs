//! Server-push channel: named events over a server-sent-event stream.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::error::ConnectionError;
use crate::job::types::Job;

/// Events the coordinator pushes at a worker.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A job was dispatched to this worker.
    NewJob(Job),
    /// Persist the hanging flag and decorate the title accordingly.
    SetHangingStatus { is_hanging: bool },
    /// Full reload, the coordinator's only cancellation primitive.
    Refresh,
    /// Orderly close; do not reconnect.
    Close,
}

/// One wire-level event after line assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental SSE parser. Feed raw bytes as they arrive; frames come out
/// whenever a blank line closes one. Partial lines and split multi-byte
/// characters stay buffered between feeds.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: String,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(frame) = self.process_line(&String::from_utf8_lossy(&line)) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.event = value.to_string(),
            "data" => self.data.push(value.to_string()),
            // id and retry have no meaning on this channel.
            _ => {}
        }
        None
    }

    /// A named event dispatches even without data lines; unnamed frames
    /// need data to count.
    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event.is_empty() && self.data.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: std::mem::take(&mut self.event),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(frame)
    }
}

fn parse_event(frame: &SseFrame) -> Option<PushEvent> {
    match frame.event.as_str() {
        "new_job" => match serde_json::from_str(&frame.data) {
            Ok(job) => Some(PushEvent::NewJob(job)),
            Err(e) => {
                tracing::warn!(error = %e, "unparsable new_job payload, ignoring");
                None
            }
        },
        "set_hanging_status" => {
            let is_hanging = serde_json::from_str::<serde_json::Value>(&frame.data)
                .ok()
                .and_then(|v| v.get("isHanging").and_then(|b| b.as_bool()))
                .unwrap_or(frame.data.trim() == "true");
            Some(PushEvent::SetHangingStatus { is_hanging })
        }
        "refresh" => Some(PushEvent::Refresh),
        "close" => Some(PushEvent::Close),
        other => {
            tracing::debug!(event = other, "ignoring unknown push event");
            None
        }
    }
}

pub type PushStream = Pin<Box<dyn Stream<Item = Result<PushEvent, ConnectionError>> + Send>>;

/// Open the push connection and adapt its byte stream into events.
/// Unknown or unparsable events are skipped, not surfaced as errors.
pub async fn connect(http: &reqwest::Client, url: &str) -> Result<PushStream, ConnectionError> {
    let response = http
        .get(url)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .map_err(|e| ConnectionError::RequestFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    if !response.status().is_success() {
        return Err(ConnectionError::BadStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let state = (
        response.bytes_stream(),
        SseParser::default(),
        VecDeque::new(),
    );
    let stream = futures::stream::unfold(state, |(mut bytes, mut parser, mut ready)| async move {
        loop {
            if let Some(event) = ready.pop_front() {
                return Some((Ok(event), (bytes, parser, ready)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in parser.feed(&chunk) {
                        if let Some(event) = parse_event(&frame) {
                            ready.push_back(event);
                        }
                    }
                }
                Some(Err(e)) => {
                    return Some((
                        Err(ConnectionError::ChannelClosed {
                            reason: e.to_string(),
                        }),
                        (bytes, parser, ready),
                    ));
                }
                None => return None,
            }
        }
    });
    Ok(Box::pin(stream))
}
