//! Simulated host page for the driver binary and the tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::{Mutex, mpsc, oneshot};
use uuid::Uuid;

use crate::error::HostError;
use crate::host::{CallDirective, HostEvent, HostEventStream, HostPage};
use crate::intercept::RequestDescriptor;
use crate::relay::ChunkStream;

/// A scripted page: records everything the bridge does to it and plays
/// back canned responses. Clones share state, so a test can keep a
/// handle while the session drives the same page.
#[derive(Clone)]
pub struct SimulatedHost {
    inner: Arc<Inner>,
}

/// One page lifetime's event channel. `reload` replaces it so the next
/// `start` observes a fresh page.
struct EventsChannel {
    tx: mpsc::UnboundedSender<HostEvent>,
    rx: Option<mpsc::UnboundedReceiver<HostEvent>>,
}

impl EventsChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// One canned response: a finite chunk script, or a stream that never
/// produces anything and never ends.
enum Script {
    Chunks(Vec<Result<String, HostError>>),
    Never,
}

struct Inner {
    events: Mutex<EventsChannel>,
    stash: Mutex<HashMap<String, String>>,
    title_decoration: Mutex<String>,
    prompts: Mutex<Vec<String>>,
    executed: Mutex<Vec<RequestDescriptor>>,
    passthroughs: Mutex<Vec<RequestDescriptor>>,
    injections: Mutex<Vec<serde_json::Value>>,
    scripted: Mutex<VecDeque<Script>>,
    reloads: AtomicUsize,
    submit_failures: AtomicUsize,
    fail_injection: AtomicBool,
    auto_trigger: AtomicBool,
    evaluation_session_id: Mutex<String>,
    evaluation_id: Mutex<String>,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                events: Mutex::new(EventsChannel::new()),
                stash: Mutex::new(HashMap::new()),
                title_decoration: Mutex::new(String::new()),
                prompts: Mutex::new(Vec::new()),
                executed: Mutex::new(Vec::new()),
                passthroughs: Mutex::new(Vec::new()),
                injections: Mutex::new(Vec::new()),
                scripted: Mutex::new(VecDeque::new()),
                reloads: AtomicUsize::new(0),
                submit_failures: AtomicUsize::new(0),
                fail_injection: AtomicBool::new(false),
                auto_trigger: AtomicBool::new(false),
                evaluation_session_id: Mutex::new(Uuid::new_v4().to_string()),
                evaluation_id: Mutex::new(Uuid::new_v4().to_string()),
            }),
        }
    }

    /// Make every submitted prompt fire the matching app call shortly
    /// after, the way the real page reacts to a UI submission.
    pub fn with_auto_trigger(self) -> Self {
        self.inner.auto_trigger.store(true, Ordering::SeqCst);
        self
    }

    pub async fn set_page_session(&self, evaluation_session_id: &str, evaluation_id: &str) {
        *self.inner.evaluation_session_id.lock().await = evaluation_session_id.to_string();
        *self.inner.evaluation_id.lock().await = evaluation_id.to_string();
    }

    /// Queue the chunk script for the next executed call.
    pub async fn script_response(&self, chunks: Vec<Result<String, HostError>>) {
        self.inner
            .scripted
            .lock()
            .await
            .push_back(Script::Chunks(chunks));
    }

    /// Queue `text`, split into randomly sized chunks.
    pub async fn script_text_response(&self, text: &str) {
        self.script_response(split_into_chunks(text)).await;
    }

    /// Queue a response that produces no chunks and never finishes, for
    /// holding a task in flight.
    pub async fn script_hanging_response(&self) {
        self.inner.scripted.lock().await.push_back(Script::Never);
    }

    /// Fail the next `n` submit attempts as if the control were disabled.
    pub fn fail_submits(&self, n: usize) {
        self.inner.submit_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next injection run.
    pub fn fail_next_injection(&self) {
        self.inner.fail_injection.store(true, Ordering::SeqCst);
    }

    /// Emit an app-originated call and wait for the bridge's directive.
    /// Returns the request the bridge executed in its place, if any.
    pub async fn originate_call(&self, request: RequestDescriptor) -> Option<RequestDescriptor> {
        let (directive_tx, directive_rx) = oneshot::channel();
        let event = HostEvent::OutgoingCall {
            request: request.clone(),
            directive_tx,
        };
        let tx = self.inner.events.lock().await.tx.clone();
        if tx.send(event).is_err() {
            return None;
        }

        match directive_rx.await {
            Ok(CallDirective::Execute {
                request: rewritten,
                relay_tx,
            }) => {
                self.inner.executed.lock().await.push(rewritten.clone());
                match self.next_script().await {
                    Script::Chunks(chunks) => {
                        for chunk in chunks {
                            if relay_tx.send(chunk).is_err() {
                                break;
                            }
                        }
                    }
                    Script::Never => {
                        // Park the sender so the relay stream stays open.
                        tokio::spawn(async move {
                            let _hold = relay_tx;
                            std::future::pending::<()>().await;
                        });
                    }
                }
                Some(rewritten)
            }
            Ok(CallDirective::Proceed) | Err(_) => {
                self.inner.passthroughs.lock().await.push(request);
                None
            }
        }
    }

    /// The call a UI submission produces: a fresh evaluation post whose
    /// tail is the submitted text, carrying the page's session ids.
    pub async fn submission_call(&self, content: &str) -> RequestDescriptor {
        let evaluation_session_id = self.inner.evaluation_session_id.lock().await.clone();
        let evaluation_id = self.inner.evaluation_id.lock().await.clone();
        RequestDescriptor::with_body(
            "POST",
            format!("/api/stream/post-to-evaluation/{evaluation_session_id}"),
            serde_json::json!({
                "messages": [{
                    "role": "user",
                    "content": content,
                    "evaluationId": evaluation_id,
                    "evaluationSessionId": evaluation_session_id,
                    "status": "pending",
                }],
                "modelAId": "page-default-model",
            })
            .to_string(),
        )
    }

    /// End the page: delivers `Unloading` and closes the event stream.
    pub async fn unload(&self) {
        let _ = self.inner.events.lock().await.tx.send(HostEvent::Unloading);
    }

    async fn next_script(&self) -> Script {
        self.inner
            .scripted
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Script::Chunks(split_into_chunks("Simulated completion.")))
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub async fn typed_prompts(&self) -> Vec<String> {
        self.inner.prompts.lock().await.clone()
    }

    pub async fn executed_requests(&self) -> Vec<RequestDescriptor> {
        self.inner.executed.lock().await.clone()
    }

    pub async fn passthrough_requests(&self) -> Vec<RequestDescriptor> {
        self.inner.passthroughs.lock().await.clone()
    }

    pub async fn title_decoration(&self) -> String {
        self.inner.title_decoration.lock().await.clone()
    }

    pub fn reload_count(&self) -> usize {
        self.inner.reloads.load(Ordering::SeqCst)
    }

    pub async fn recorded_injections(&self) -> Vec<serde_json::Value> {
        self.inner.injections.lock().await.clone()
    }
}

#[async_trait]
impl HostPage for SimulatedHost {
    async fn start(&self) -> Result<HostEventStream, HostError> {
        let rx = self
            .inner
            .events
            .lock()
            .await
            .rx
            .take()
            .ok_or_else(|| HostError::RequestFailed {
                reason: "page events already started".to_string(),
            })?;
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn submit_prompt(&self, text: &str) -> Result<(), HostError> {
        let disabled = self
            .inner
            .submit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if disabled {
            return Err(HostError::SubmitDisabled);
        }

        self.inner.prompts.lock().await.push(text.to_string());

        if self.inner.auto_trigger.load(Ordering::SeqCst) {
            let host = self.clone();
            let content = text.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(25)).await;
                let call = host.submission_call(&content).await;
                host.originate_call(call).await;
            });
        }
        Ok(())
    }

    async fn execute(&self, request: &RequestDescriptor) -> Result<ChunkStream, HostError> {
        self.inner.executed.lock().await.push(request.clone());
        Ok(match self.next_script().await {
            Script::Chunks(chunks) => futures::stream::iter(chunks).boxed(),
            Script::Never => futures::stream::pending().boxed(),
        })
    }

    async fn reload(&self) {
        self.inner.reloads.fetch_add(1, Ordering::SeqCst);
        // A reload is a new page lifetime: the old event stream ends and
        // the next `start` gets a fresh one.
        *self.inner.events.lock().await = EventsChannel::new();
    }

    async fn set_title_decoration(&self, decoration: &str) {
        *self.inner.title_decoration.lock().await = decoration.to_string();
    }

    async fn page_snapshot(&self) -> Result<String, HostError> {
        let prompts = self.inner.prompts.lock().await.len();
        Ok(format!(
            "<html><body data-prompts=\"{prompts}\">simulated</body></html>"
        ))
    }

    async fn run_injection(&self, payload: &serde_json::Value) -> Result<(), HostError> {
        if self.inner.fail_injection.swap(false, Ordering::SeqCst) {
            return Err(HostError::InjectionFailed {
                reason: "scripted injection failure".to_string(),
            });
        }
        self.inner.injections.lock().await.push(payload.clone());
        Ok(())
    }

    async fn stash_put(&self, key: &str, value: &str) {
        self.inner
            .stash
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
    }

    async fn stash_get(&self, key: &str) -> Option<String> {
        self.inner.stash.lock().await.get(key).cloned()
    }

    async fn stash_take(&self, key: &str) -> Option<String> {
        self.inner.stash.lock().await.remove(key)
    }
}

fn split_into_chunks(text: &str) -> Vec<Result<String, HostError>> {
    let mut rng = rand::thread_rng();
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut index = 0;
    while index < chars.len() {
        let size = rng.gen_range(1..=6).min(chars.len() - index);
        chunks.push(Ok(chars[index..index + size].iter().collect()));
        index += size;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_failures_burn_down() {
        let host = SimulatedHost::new();
        host.fail_submits(2);

        assert!(matches!(
            host.submit_prompt("one").await,
            Err(HostError::SubmitDisabled)
        ));
        assert!(matches!(
            host.submit_prompt("two").await,
            Err(HostError::SubmitDisabled)
        ));
        host.submit_prompt("three").await.unwrap();
        assert_eq!(host.typed_prompts().await, vec!["three"]);
    }

    #[tokio::test]
    async fn execute_plays_back_script_in_order() {
        let host = SimulatedHost::new();
        host.script_response(vec![Ok("a".to_string()), Ok("b".to_string())])
            .await;

        let request = RequestDescriptor::new("PUT", "/somewhere");
        let stream = host.execute(&request).await.unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks, vec!["a", "b"]);
        assert_eq!(host.executed_requests().await, vec![request]);
    }

    #[tokio::test]
    async fn stash_survives_reload() {
        let host = SimulatedHost::new();
        host.stash_put("k", "v").await;
        host.reload().await;
        assert_eq!(host.stash_get("k").await.as_deref(), Some("v"));
        assert_eq!(host.stash_take("k").await.as_deref(), Some("v"));
        assert!(host.stash_get("k").await.is_none());
    }

    #[tokio::test]
    async fn start_once_per_page_lifetime() {
        let host = SimulatedHost::new();
        let _events = host.start().await.unwrap();
        assert!(host.start().await.is_err());

        // A reload begins a new lifetime with a fresh event stream.
        host.reload().await;
        assert!(host.start().await.is_ok());
    }

    #[tokio::test]
    async fn dropped_directive_counts_as_proceed() {
        let host = SimulatedHost::new();
        let mut events = host.start().await.unwrap();

        let caller = host.clone();
        let originate = tokio::spawn(async move {
            caller
                .originate_call(RequestDescriptor::new("GET", "/anything"))
                .await
        });

        // Drop the directive sender without answering.
        match events.next().await {
            Some(HostEvent::OutgoingCall { directive_tx, .. }) => drop(directive_tx),
            other => panic!("expected outgoing call, got {other:?}"),
        }

        assert!(originate.await.unwrap().is_none());
        assert_eq!(host.passthrough_requests().await.len(), 1);
    }

    #[test]
    fn chunk_split_preserves_text() {
        let chunks = split_into_chunks("hello chunked world");
        let joined: String = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(joined, "hello chunked world");
    }
}
