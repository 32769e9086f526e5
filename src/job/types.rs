//! Job wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::MessageTemplate;

/// What the target model produces. Image chains settle every message
/// instead of leaving a pending tail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Text,
    Image,
}

/// A dispatched unit of work. `task_id` is the correlation key for every
/// chunk and the final result report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub task_id: String,
    #[serde(flatten)]
    pub payload: JobPayload,
}

/// The two job kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum JobPayload {
    /// Content to push through the page UI right away.
    Prompt(PromptPayload),
    /// Deferred: nothing happens until the app originates a trigger call,
    /// which gets rewritten with this payload's templates.
    Messages(MessagesPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPayload {
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagesPayload {
    pub templates: Vec<MessageTemplate>,
    pub target_model: String,
    /// Evaluation session to retry into. Required for bridge-owned calls,
    /// unused on the trigger path where the page supplies its own.
    pub session_id: Option<String>,
    /// Message to retry. Required for bridge-owned calls.
    pub message_id: Option<String>,
    pub model_type: ModelType,
}

impl MessagesPayload {
    pub fn image_generation(&self) -> bool {
        self.model_type == ModelType::Image
    }
}

/// A page-injection task delivered at session start, outside the task slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionJob {
    pub injection_id: String,
    #[serde(default)]
    pub payload: Value,
}

/// Fetch envelope: `{status:"success", job:{...}}` when work is available,
/// empty otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub job: Option<T>,
}

impl<T> Envelope<T> {
    pub fn into_job(self) -> Option<T> {
        if self.status.as_deref() == Some("success") {
            self.job
        } else {
            None
        }
    }
}
