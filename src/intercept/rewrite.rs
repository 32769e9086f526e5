//! Construction of bridge-owned calls and trigger rewrites.

use serde_json::{Value, json};

use crate::chain::{ChainRequest, SessionContext, build_chain};
use crate::error::ChainError;
use crate::intercept::RequestDescriptor;
use crate::job::types::MessagesPayload;

fn retry_url(session_id: &str, message_id: &str) -> String {
    format!("/api/stream/retry-evaluation-session-message/{session_id}/messages/{message_id}")
}

/// Build a bridge-owned retry-style call. The body is entirely ours:
/// settled history plus one pending tail, aimed at the job's model.
pub fn build_retry_request(payload: &MessagesPayload) -> Result<RequestDescriptor, ChainError> {
    let session_id = payload
        .session_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(ChainError::MissingSessionContext)?;
    let message_id = payload
        .message_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(ChainError::MissingSessionContext)?;

    let session = SessionContext::new(session_id);
    let chain = build_chain(&ChainRequest {
        templates: &payload.templates,
        target_model: &payload.target_model,
        session: &session,
        image_generation: payload.image_generation(),
    })?;

    Ok(RequestDescriptor {
        method: "PUT".to_string(),
        url: retry_url(session_id, message_id),
        body: Some(chain.retry_body().to_string()),
    })
}

/// Rewrite an app-originated trigger submission in place: keep the app's
/// own envelope and session identifiers, swap the message list for a
/// chain built from the job templates, and aim the call at the job's
/// target model.
pub fn rewrite_trigger_request(
    original: &RequestDescriptor,
    payload: &MessagesPayload,
) -> Result<RequestDescriptor, ChainError> {
    let raw = original.body.as_deref().unwrap_or_default();
    let mut body: Value = serde_json::from_str(raw).map_err(|e| ChainError::MalformedBody {
        reason: e.to_string(),
    })?;

    let session = session_from_body(&body)?;
    let chain = build_chain(&ChainRequest {
        templates: &payload.templates,
        target_model: &payload.target_model,
        session: &session,
        image_generation: payload.image_generation(),
    })?;

    body["messages"] = json!(chain.messages);
    body["modelAId"] = json!(payload.target_model);
    body["userMessageId"] = json!(chain.last_user_id());
    body["modelAMessageId"] = json!(chain.last_assistant_id());

    Ok(RequestDescriptor {
        method: original.method.clone(),
        url: original.url.clone(),
        body: Some(body.to_string()),
    })
}

/// Pull the live session identifiers out of the submission the page was
/// about to make. They live on the last message of its list.
fn session_from_body(body: &Value) -> Result<SessionContext, ChainError> {
    let last = body
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|m| m.last())
        .ok_or(ChainError::MissingSessionContext)?;

    let evaluation_session_id = last
        .get("evaluationSessionId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(ChainError::MissingSessionContext)?
        .to_string();

    let evaluation_id = last
        .get("evaluationId")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(SessionContext {
        evaluation_session_id,
        evaluation_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MessageTemplate;
    use crate::job::types::ModelType;

    fn payload() -> MessagesPayload {
        MessagesPayload {
            templates: vec![
                MessageTemplate::new("user", "question"),
                MessageTemplate::new("assistant", ""),
            ],
            target_model: "model-b".to_string(),
            session_id: Some("session-1".to_string()),
            message_id: Some("message-1".to_string()),
            model_type: ModelType::Text,
        }
    }

    fn trigger_descriptor(last_message: Value) -> RequestDescriptor {
        RequestDescriptor::with_body(
            "POST",
            "/api/stream/post-to-evaluation/abc",
            json!({
                "mode": "direct",
                "messages": [last_message],
            })
            .to_string(),
        )
    }

    #[test]
    fn retry_request_has_owned_body() {
        let request = build_retry_request(&payload()).unwrap();

        assert_eq!(request.method, "PUT");
        assert_eq!(
            request.url,
            "/api/stream/retry-evaluation-session-message/session-1/messages/message-1"
        );

        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["modelId"], "model-b");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["evaluationSessionId"], "session-1");
        assert_eq!(body["messages"][1]["status"], "pending");
    }

    #[test]
    fn retry_request_requires_both_ids() {
        let mut missing_session = payload();
        missing_session.session_id = None;
        assert!(matches!(
            build_retry_request(&missing_session).unwrap_err(),
            ChainError::MissingSessionContext
        ));

        let mut missing_message = payload();
        missing_message.message_id = Some(String::new());
        assert!(matches!(
            build_retry_request(&missing_message).unwrap_err(),
            ChainError::MissingSessionContext
        ));
    }

    #[test]
    fn retry_request_requires_templates() {
        let mut empty = payload();
        empty.templates.clear();
        assert!(matches!(
            build_retry_request(&empty).unwrap_err(),
            ChainError::EmptyTemplateList
        ));
    }

    #[test]
    fn rewrite_keeps_page_session_and_swaps_messages() {
        let original = trigger_descriptor(json!({
            "role": "user",
            "content": "[bridge-placeholder]",
            "evaluationId": "eval-9",
            "evaluationSessionId": "eval-session-9",
        }));

        let rewritten = rewrite_trigger_request(&original, &payload()).unwrap();
        assert_eq!(rewritten.method, original.method);
        assert_eq!(rewritten.url, original.url);

        let body: Value = serde_json::from_str(rewritten.body.as_deref().unwrap()).unwrap();
        // Untouched envelope fields survive.
        assert_eq!(body["mode"], "direct");
        assert_eq!(body["modelAId"], "model-b");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        for message in messages {
            assert_eq!(message["evaluationSessionId"], "eval-session-9");
            assert_eq!(message["evaluationId"], "eval-9");
        }

        assert_eq!(body["userMessageId"], messages[0]["id"]);
        assert_eq!(body["modelAMessageId"], messages[1]["id"]);
    }

    #[test]
    fn rewrite_without_session_context_fails() {
        let original = trigger_descriptor(json!({
            "role": "user",
            "content": "[bridge-placeholder]",
        }));
        assert!(matches!(
            rewrite_trigger_request(&original, &payload()).unwrap_err(),
            ChainError::MissingSessionContext
        ));
    }

    #[test]
    fn rewrite_with_unparsable_body_fails() {
        let original =
            RequestDescriptor::with_body("POST", "/api/stream/post-to-evaluation/abc", "{nope");
        assert!(matches!(
            rewrite_trigger_request(&original, &payload()).unwrap_err(),
            ChainError::MalformedBody { .. }
        ));
    }
}
