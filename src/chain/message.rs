//! Wire types for the hosted app's message envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Per-message status inside a submitted chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// The app streams a completion into this message.
    Pending,
    /// Settled history the app takes as-is.
    Success,
}

/// A template message from a job payload, before chaining.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Value>,
    #[serde(default)]
    pub participant_position: Option<String>,
}

impl MessageTemplate {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            attachments: Vec::new(),
            participant_position: None,
        }
    }
}

/// One link of the parent-linked chain the app accepts.
///
/// Field names follow the app's envelope, including the odd
/// `experimental_attachments` spelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainedMessage {
    pub role: String,
    pub content: String,
    pub id: Uuid,
    pub evaluation_id: Option<String>,
    pub evaluation_session_id: String,
    pub parent_message_ids: Vec<Uuid>,
    #[serde(rename = "experimental_attachments")]
    pub attachments: Vec<Value>,
    pub failure_reason: Option<String>,
    pub metadata: Option<Value>,
    pub participant_position: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identifiers of the evaluation session a chain is submitted into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub evaluation_session_id: String,
    pub evaluation_id: Option<String>,
}

impl SessionContext {
    pub fn new(evaluation_session_id: impl Into<String>) -> Self {
        Self {
            evaluation_session_id: evaluation_session_id.into(),
            evaluation_id: None,
        }
    }
}
