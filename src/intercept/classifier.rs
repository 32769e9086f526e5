//! Pure classification of outgoing page calls.

use regex::Regex;

use crate::intercept::{InterceptSnapshot, RequestDescriptor};

/// URL template of retry-style evaluation calls. Capture groups: session
/// id, then message id.
const RETRY_URL_PATTERN: &str =
    r"/api/stream/retry-evaluation-session-message/([a-f0-9-]+)/messages/([a-f0-9-]+)";

/// Path prefix of fresh evaluation submissions.
pub const EVALUATION_POST_PATH: &str = "/api/stream/post-to-evaluation/";

/// Markers a trigger submission's last user message starts with.
pub const DEFAULT_TRIGGER_MARKERS: [&str; 2] = ["[bridge-placeholder]", "[bridge-keepalive]"];

/// What classification matches against. Built once per session.
#[derive(Debug, Clone)]
pub struct InterceptRules {
    retry_url: Regex,
    trigger_markers: Vec<String>,
}

impl Default for InterceptRules {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER_MARKERS.iter().map(|m| m.to_string()))
    }
}

impl InterceptRules {
    pub fn new(trigger_markers: impl IntoIterator<Item = String>) -> Self {
        Self {
            retry_url: Regex::new(RETRY_URL_PATTERN).unwrap(),
            trigger_markers: trigger_markers.into_iter().collect(),
        }
    }

    /// Does the submission body's last message carry a trigger marker?
    /// Only a user-role tail counts; anything unparsable does not.
    pub fn body_has_trigger(&self, body: Option<&str>) -> bool {
        let Some(body) = body else { return false };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
            return false;
        };
        let Some(last) = value
            .get("messages")
            .and_then(|m| m.as_array())
            .and_then(|m| m.last())
        else {
            return false;
        };
        if last.get("role").and_then(|r| r.as_str()) != Some("user") {
            return false;
        }
        let content = last
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .trim();
        self.trigger_markers
            .iter()
            .any(|marker| content.starts_with(marker.as_str()))
    }
}

/// Verdict for one outgoing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A retry-style call the bridge itself constructed. Its response is
    /// relayed upstream.
    BridgeOwned {
        session_id: String,
        message_id: String,
    },
    /// An app-originated submission whose tail carries a trigger marker.
    /// Eligible for rewrite.
    Trigger,
    /// Forwarded untouched.
    Passthrough,
    /// Forwarded untouched, but the armed capture wants these ids.
    CapturedPassthrough {
        session_id: String,
        message_id: String,
    },
}

/// Classify one outgoing call. Pure: no IO, no flag mutation.
pub fn classify(
    rules: &InterceptRules,
    snapshot: InterceptSnapshot,
    request: &RequestDescriptor,
) -> Classification {
    if let Some(caps) = rules.retry_url.captures(&request.url) {
        let session_id = caps[1].to_string();
        let message_id = caps[2].to_string();
        if snapshot.rewriting {
            return Classification::BridgeOwned {
                session_id,
                message_id,
            };
        }
        if snapshot.capture_armed {
            return Classification::CapturedPassthrough {
                session_id,
                message_id,
            };
        }
        return Classification::Passthrough;
    }

    if request.method.eq_ignore_ascii_case("POST")
        && request.url.contains(EVALUATION_POST_PATH)
        && !snapshot.rewriting
        && rules.body_has_trigger(request.body.as_deref())
    {
        return Classification::Trigger;
    }

    Classification::Passthrough
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "aaaaaaaa-1111-2222-3333-444444444444";
    const MESSAGE: &str = "bbbbbbbb-5555-6666-7777-888888888888";

    fn retry_request() -> RequestDescriptor {
        RequestDescriptor::new(
            "PUT",
            format!("/api/stream/retry-evaluation-session-message/{SESSION}/messages/{MESSAGE}"),
        )
    }

    fn trigger_request(content: &str) -> RequestDescriptor {
        RequestDescriptor::with_body(
            "POST",
            "/api/stream/post-to-evaluation/xyz",
            serde_json::json!({
                "messages": [{"role": "user", "content": content}],
            })
            .to_string(),
        )
    }

    fn snapshot(rewriting: bool, capture_armed: bool) -> InterceptSnapshot {
        InterceptSnapshot {
            rewriting,
            capture_armed,
        }
    }

    #[test]
    fn bridge_owned_only_while_rewriting() {
        let rules = InterceptRules::default();
        let request = retry_request();

        match classify(&rules, snapshot(true, false), &request) {
            Classification::BridgeOwned {
                session_id,
                message_id,
            } => {
                assert_eq!(session_id, SESSION);
                assert_eq!(message_id, MESSAGE);
            }
            other => panic!("expected BridgeOwned, got {other:?}"),
        }

        assert_eq!(
            classify(&rules, snapshot(false, false), &request),
            Classification::Passthrough
        );
    }

    #[test]
    fn armed_capture_harvests_retry_ids() {
        let rules = InterceptRules::default();
        match classify(&rules, snapshot(false, true), &retry_request()) {
            Classification::CapturedPassthrough {
                session_id,
                message_id,
            } => {
                assert_eq!(session_id, SESSION);
                assert_eq!(message_id, MESSAGE);
            }
            other => panic!("expected CapturedPassthrough, got {other:?}"),
        }
    }

    #[test]
    fn trigger_markers_detected() {
        let rules = InterceptRules::default();
        for marker in DEFAULT_TRIGGER_MARKERS {
            let request = trigger_request(&format!("{marker} more text"));
            assert_eq!(
                classify(&rules, snapshot(false, false), &request),
                Classification::Trigger,
                "marker {marker} should classify as trigger"
            );
        }
    }

    #[test]
    fn trigger_marker_tolerates_leading_whitespace() {
        let rules = InterceptRules::default();
        let request = trigger_request("  [bridge-placeholder] hi");
        assert_eq!(
            classify(&rules, snapshot(false, false), &request),
            Classification::Trigger
        );
    }

    #[test]
    fn rewriting_guard_suppresses_trigger() {
        let rules = InterceptRules::default();
        let request = trigger_request("[bridge-placeholder]");
        assert_eq!(
            classify(&rules, snapshot(true, false), &request),
            Classification::Passthrough
        );
    }

    #[test]
    fn plain_submission_passes_through() {
        let rules = InterceptRules::default();
        let request = trigger_request("just a normal message");
        assert_eq!(
            classify(&rules, snapshot(false, false), &request),
            Classification::Passthrough
        );
    }

    #[test]
    fn assistant_tail_is_not_a_trigger() {
        let rules = InterceptRules::default();
        let request = RequestDescriptor::with_body(
            "POST",
            "/api/stream/post-to-evaluation/xyz",
            serde_json::json!({
                "messages": [
                    {"role": "user", "content": "[bridge-placeholder]"},
                    {"role": "assistant", "content": "[bridge-placeholder]"},
                ],
            })
            .to_string(),
        );
        assert_eq!(
            classify(&rules, snapshot(false, false), &request),
            Classification::Passthrough
        );
    }

    #[test]
    fn malformed_body_passes_through() {
        let rules = InterceptRules::default();
        let request =
            RequestDescriptor::with_body("POST", "/api/stream/post-to-evaluation/xyz", "not json");
        assert_eq!(
            classify(&rules, snapshot(false, false), &request),
            Classification::Passthrough
        );
    }

    #[test]
    fn unrelated_urls_pass_through() {
        let rules = InterceptRules::default();
        let request = RequestDescriptor::new("GET", "/api/models");
        assert_eq!(
            classify(&rules, snapshot(true, true), &request),
            Classification::Passthrough
        );
    }
}
