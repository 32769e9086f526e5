//! Duplex channel: work frames in, result frames out, one websocket.

use std::pin::Pin;

use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::ConnectionError;
use crate::job::types::MessagesPayload;
use crate::relay::TERMINAL_MARKER;

/// Control commands the coordinator issues over the duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlCommand {
    Refresh,
    Reconnect,
    ActivateCapture,
}

/// Inbound frames: either a bare control command or a work request.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    Command {
        command: ControlCommand,
    },
    #[serde(rename_all = "camelCase")]
    Work {
        request_id: String,
        payload: MessagesPayload,
    },
}

/// Payload of one outbound result frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultData {
    Chunk(String),
    Terminal,
    Error(String),
}

impl ResultData {
    fn to_json(&self) -> serde_json::Value {
        match self {
            ResultData::Chunk(chunk) => json!(chunk),
            ResultData::Terminal => json!(TERMINAL_MARKER),
            ResultData::Error(message) => json!({ "error": message }),
        }
    }
}

pub fn encode_result_frame(request_id: &str, data: &ResultData) -> String {
    json!({ "requestId": request_id, "data": data.to_json() }).to_string()
}

pub fn decode_inbound(text: &str) -> Result<InboundFrame, ConnectionError> {
    serde_json::from_str(text).map_err(|e| ConnectionError::MalformedFrame(e.to_string()))
}

/// Cloneable writer half. Result frames from concurrent relays funnel
/// through one writer task, so frame text never interleaves.
#[derive(Debug, Clone)]
pub struct DuplexHandle {
    tx: tokio::sync::mpsc::UnboundedSender<Message>,
}

impl DuplexHandle {
    pub fn send_result(&self, request_id: &str, data: &ResultData) -> Result<(), ConnectionError> {
        self.tx
            .send(Message::text(encode_result_frame(request_id, data)))
            .map_err(|_| ConnectionError::SendFailed {
                reason: "duplex writer closed".to_string(),
            })
    }
}

pub type InboundStream = Pin<Box<dyn Stream<Item = Result<InboundFrame, ConnectionError>> + Send>>;

/// Connect and split the socket: a cloneable sender plus a stream of
/// inbound frames. A malformed frame surfaces as an error item without
/// ending the stream; close and transport errors end it.
pub async fn connect(url: &str) -> Result<(DuplexHandle, InboundStream), ConnectionError> {
    let (socket, _) =
        connect_async(url)
            .await
            .map_err(|e| ConnectionError::HandshakeFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
    let (mut write, read) = socket.split();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if write.send(message).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let inbound = read.filter_map(|item| async move {
        match item {
            Ok(Message::Text(text)) => Some(decode_inbound(&text)),
            Ok(Message::Close(_)) => Some(Err(ConnectionError::ChannelClosed {
                reason: "server closed the socket".to_string(),
            })),
            Ok(_) => None,
            Err(e) => Some(Err(ConnectionError::ChannelClosed {
                reason: e.to_string(),
            })),
        }
    });

    Ok((DuplexHandle { tx }, Box::pin(inbound)))
}
