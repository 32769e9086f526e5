//! Builds the parent-linked message chain the app accepts.

use chrono::Utc;
use uuid::Uuid;

use crate::chain::message::{ChainedMessage, MessageStatus, MessageTemplate, SessionContext};
use crate::error::ChainError;

/// Inputs for one chain build.
#[derive(Debug, Clone)]
pub struct ChainRequest<'a> {
    pub templates: &'a [MessageTemplate],
    pub target_model: &'a str,
    pub session: &'a SessionContext,
    /// Image jobs mark every message settled; the app starts generating
    /// without a pending tail.
    pub image_generation: bool,
}

/// A built chain plus the model it targets.
#[derive(Debug, Clone)]
pub struct Chain {
    pub messages: Vec<ChainedMessage>,
    pub target_model: String,
}

impl Chain {
    /// Id of the last user-role message, if any.
    pub fn last_user_id(&self) -> Option<Uuid> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.id)
    }

    /// Id of the last assistant-role message, if any.
    pub fn last_assistant_id(&self) -> Option<Uuid> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "assistant")
            .map(|m| m.id)
    }

    /// Body for a bridge-owned retry-style call.
    pub fn retry_body(&self) -> serde_json::Value {
        serde_json::json!({
            "messages": self.messages,
            "modelId": self.target_model,
        })
    }
}

/// Turn job templates into a linear chain: each message carries a fresh id,
/// the previous message's id as its only parent (first gets none), and the
/// session context. All messages are settled except the last, which stays
/// pending so the app streams a completion into it.
pub fn build_chain(request: &ChainRequest) -> Result<Chain, ChainError> {
    if request.templates.is_empty() {
        return Err(ChainError::EmptyTemplateList);
    }
    if request.session.evaluation_session_id.is_empty() {
        return Err(ChainError::MissingSessionContext);
    }

    let now = Utc::now();
    let last = request.templates.len() - 1;
    let mut previous: Option<Uuid> = None;

    let messages = request
        .templates
        .iter()
        .enumerate()
        .map(|(index, template)| {
            let id = Uuid::new_v4();
            let parent_message_ids = previous.take().into_iter().collect();
            previous = Some(id);

            let status = if index == last && !request.image_generation {
                MessageStatus::Pending
            } else {
                MessageStatus::Success
            };

            ChainedMessage {
                role: template.role.clone(),
                content: template.content.clone(),
                id,
                evaluation_id: request.session.evaluation_id.clone(),
                evaluation_session_id: request.session.evaluation_session_id.clone(),
                parent_message_ids,
                attachments: template.attachments.clone(),
                failure_reason: None,
                metadata: None,
                participant_position: template
                    .participant_position
                    .clone()
                    .unwrap_or_else(|| "a".to_string()),
                status,
                created_at: now,
                updated_at: now,
            }
        })
        .collect();

    Ok(Chain {
        messages,
        target_model: request.target_model.to_string(),
    })
}
