//! Integration tests for the duplex channel: control commands and work
//! frames arrive on one websocket, result frames go back on the same
//! socket keyed by request id.
//!
//! Each test runs an Axum server with a scripted `/ws` endpoint plus the
//! REST routes the session setup phase needs, and drives a worker
//! session against it through a simulated host page.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;

use tab_bridge::config::{BridgeConfig, ChannelMode};
use tab_bridge::host::{HostPage, SimulatedHost};
use tab_bridge::identity::InMemoryLeaseStore;
use tab_bridge::intercept::RequestDescriptor;
use tab_bridge::session::{RESET_PENDING_KEY, SessionExit, WorkerSession};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const SESSION_ID: &str = "3f9a6c52-0000-4aaa-8bbb-111122223333";
const MESSAGE_ID: &str = "5d2e8b10-0000-4ccc-8ddd-444455556666";

struct DuplexState {
    remote_config: Value,
    /// One scripted frame feed per expected connection, in accept order.
    feeds: Mutex<VecDeque<mpsc::UnboundedReceiver<Message>>>,
    /// Every text frame the server received, parsed.
    received: Mutex<Vec<Value>>,
    connections: AtomicUsize,
    hits: AtomicUsize,
}

struct MockDuplex {
    port: u16,
    state: Arc<DuplexState>,
    /// Writer for the first connection's scripted frames.
    feed: mpsc::UnboundedSender<Message>,
}

impl MockDuplex {
    fn send(&self, frame: Value) {
        self.feed
            .send(Message::Text(frame.to_string().into()))
            .expect("duplex feed closed");
    }

    /// Queue a frame feed for one more expected connection.
    async fn add_connection_feed(&self) -> mpsc::UnboundedSender<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.feeds.lock().await.push_back(rx);
        tx
    }
}

async fn serve_ws(
    State(state): State<Arc<DuplexState>>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| drive_socket(state, socket))
}

async fn drive_socket(state: Arc<DuplexState>, socket: WebSocket) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let feed = state.feeds.lock().await.pop_front();
    let (mut write, mut read) = socket.split();

    if let Some(mut feed) = feed {
        tokio::spawn(async move {
            while let Some(message) = feed.recv().await {
                if write.send(message).await.is_err() {
                    break;
                }
            }
        });
    }

    while let Some(Ok(message)) = read.next().await {
        if let Message::Text(text) = message
            && let Ok(value) = serde_json::from_str::<Value>(text.as_str())
        {
            state.received.lock().await.push(value);
        }
    }
}

async fn serve_config(State(state): State<Arc<DuplexState>>) -> Json<Value> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    Json(state.remote_config.clone())
}

async fn serve_injection_job(State(state): State<Arc<DuplexState>>) -> String {
    state.hits.fetch_add(1, Ordering::SeqCst);
    String::new()
}

async fn record_log(State(state): State<Arc<DuplexState>>, Json(_body): Json<Value>) -> &'static str {
    state.hits.fetch_add(1, Ordering::SeqCst);
    "ok"
}

/// Start the mock coordinator with one pre-queued connection feed.
async fn start_duplex(remote_config: Value) -> MockDuplex {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (feed, first_rx) = mpsc::unbounded_channel();

    let state = Arc::new(DuplexState {
        remote_config,
        feeds: Mutex::new(VecDeque::from([first_rx])),
        received: Mutex::new(Vec::new()),
        connections: AtomicUsize::new(0),
        hits: AtomicUsize::new(0),
    });

    let app = axum::Router::new()
        .route("/ws", get(serve_ws))
        .route("/get_config", get(serve_config))
        .route("/get_injection_job", get(serve_injection_job))
        .route("/log", post(record_log))
        .with_state(Arc::clone(&state));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    MockDuplex { port, state, feed }
}

/// Tiny capture listener standing in for the local tool that harvests
/// session ids.
async fn start_capture_listener() -> (u16, Arc<Mutex<Vec<Value>>>) {
    let updates: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    async fn record_update(
        State(updates): State<Arc<Mutex<Vec<Value>>>>,
        Json(body): Json<Value>,
    ) -> &'static str {
        updates.lock().await.push(body);
        "ok"
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = axum::Router::new()
        .route("/update", post(record_update))
        .with_state(Arc::clone(&updates));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, updates)
}

fn test_config(port: u16) -> BridgeConfig {
    BridgeConfig {
        coordinator_url: format!("http://127.0.0.1:{port}"),
        channel: ChannelMode::Duplex,
        renewal_period: Duration::from_millis(50),
        busy_threshold: Duration::from_millis(150),
        gc_threshold: Duration::from_millis(400),
        reconnect_delay: Duration::from_millis(100),
        setup_retry_delay: Duration::from_millis(50),
        discover_endpoint: false,
        submit_settle_delay: Duration::from_millis(1),
        submit_retry_delay: Duration::from_millis(5),
        poll_interval: Duration::from_millis(30),
        poll_jobs: false,
    }
}

fn make_session(config: BridgeConfig, host: &SimulatedHost) -> Arc<WorkerSession> {
    let store = Arc::new(InMemoryLeaseStore::new());
    Arc::new(WorkerSession::new(config, Arc::new(host.clone()), store).unwrap())
}

fn spawn_session(session: &Arc<WorkerSession>) -> tokio::task::JoinHandle<SessionExit> {
    let session = Arc::clone(session);
    tokio::spawn(async move { session.run().await.unwrap() })
}

/// Poll `condition` until it holds or the deadline passes.
async fn wait_for(what: &str, mut condition: impl AsyncFnMut() -> bool) {
    for _ in 0..400 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn work_frame(request_id: &str) -> Value {
    json!({
        "requestId": request_id,
        "payload": {
            "templates": [
                { "role": "user", "content": "question" },
                { "role": "assistant", "content": "" },
            ],
            "targetModel": "model-b",
            "sessionId": SESSION_ID,
            "messageId": MESSAGE_ID,
        },
    })
}

async fn frames_for(state: &DuplexState, request_id: &str) -> Vec<Value> {
    state
        .received
        .lock()
        .await
        .iter()
        .filter(|frame| frame["requestId"] == request_id)
        .cloned()
        .collect()
}

// ── Work frames ──────────────────────────────────────────────────────

#[tokio::test]
async fn work_frame_relays_chunks_then_terminal() {
    timeout(TEST_TIMEOUT, async {
        let duplex = start_duplex(json!({})).await;
        let host = SimulatedHost::new();
        host.script_response(vec![Ok("He".to_string()), Ok("llo".to_string())])
            .await;
        let session = make_session(test_config(duplex.port), &host);
        let run = spawn_session(&session);

        duplex.send(work_frame("req-1"));

        let state = Arc::clone(&duplex.state);
        wait_for("three result frames", async || {
            state.received.lock().await.len() == 3
        })
        .await;

        let frames = duplex.state.received.lock().await.clone();
        assert!(frames.iter().all(|frame| frame["requestId"] == "req-1"));
        assert_eq!(frames[0]["data"], "He");
        assert_eq!(frames[1]["data"], "llo");
        assert_eq!(frames[2]["data"], "[DONE]");

        // The bridge built and originated the retry call itself.
        let executed = host.executed_requests().await;
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].method, "PUT");
        assert_eq!(
            executed[0].url,
            format!("/api/stream/retry-evaluation-session-message/{SESSION_ID}/messages/{MESSAGE_ID}")
        );
        let body: Value = serde_json::from_str(executed[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body["modelId"], "model-b");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["status"], "pending");

        // The terminal frame freed the slot: the next work frame runs.
        host.script_response(vec![Ok("done".to_string())]).await;
        duplex.send(work_frame("req-2"));
        wait_for("second task frames", async || {
            frames_for(&state, "req-2").await.len() == 2
        })
        .await;
        let follow_up = frames_for(&duplex.state, "req-2").await;
        assert_eq!(follow_up[0]["data"], "done");
        assert_eq!(follow_up[1]["data"], "[DONE]");

        host.unload().await;
        assert_eq!(run.await.unwrap(), SessionExit::Closed);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn empty_template_work_frame_fails_terminally() {
    timeout(TEST_TIMEOUT, async {
        let duplex = start_duplex(json!({})).await;
        let host = SimulatedHost::new();
        let session = make_session(test_config(duplex.port), &host);
        let run = spawn_session(&session);

        duplex.send(json!({
            "requestId": "req-9",
            "payload": {
                "templates": [],
                "targetModel": "model-b",
                "sessionId": SESSION_ID,
                "messageId": MESSAGE_ID,
            },
        }));

        let state = Arc::clone(&duplex.state);
        wait_for("error and terminal frames", async || {
            state.received.lock().await.len() == 2
        })
        .await;

        // Exactly two emissions: the error payload, then the end marker.
        let frames = duplex.state.received.lock().await.clone();
        assert!(frames.iter().all(|frame| frame["requestId"] == "req-9"));
        assert_eq!(frames[0]["data"]["error"], "Template list is empty");
        assert_eq!(frames[1]["data"], "[DONE]");
        assert!(host.executed_requests().await.is_empty());

        // Terminal means the slot is free again.
        host.script_response(vec![Ok("ok".to_string())]).await;
        duplex.send(work_frame("req-10"));
        wait_for("follow-up task frames", async || {
            frames_for(&state, "req-10").await.len() == 2
        })
        .await;

        host.unload().await;
        assert_eq!(run.await.unwrap(), SessionExit::Closed);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn busy_work_frame_rejected_without_touching_active() {
    timeout(TEST_TIMEOUT, async {
        let duplex = start_duplex(json!({})).await;
        let host = SimulatedHost::new();
        host.script_hanging_response().await;
        let session = make_session(test_config(duplex.port), &host);
        let run = spawn_session(&session);

        // First task occupies the slot and never finishes.
        duplex.send(work_frame("req-1"));
        wait_for("first task executing", async || {
            host.executed_requests().await.len() == 1
        })
        .await;

        duplex.send(work_frame("req-2"));

        let state = Arc::clone(&duplex.state);
        wait_for("rejection frames", async || {
            state.received.lock().await.len() == 2
        })
        .await;

        // Only the rejected request id is answered; the active task is
        // untouched and still streaming nothing.
        let frames = duplex.state.received.lock().await.clone();
        assert!(frames.iter().all(|frame| frame["requestId"] == "req-2"));
        assert_eq!(
            frames[0]["data"]["error"],
            "worker is busy with another task"
        );
        assert_eq!(frames[1]["data"], "[DONE]");
        assert_eq!(host.executed_requests().await.len(), 1);

        host.unload().await;
        assert_eq!(run.await.unwrap(), SessionExit::Closed);
    })
    .await
    .expect("test timed out");
}

// ── Control commands ─────────────────────────────────────────────────

#[tokio::test]
async fn refresh_command_restarts_page_without_network() {
    timeout(TEST_TIMEOUT, async {
        let duplex = start_duplex(json!({})).await;
        let host = SimulatedHost::new();
        let session = make_session(test_config(duplex.port), &host);
        let run = spawn_session(&session);

        duplex.send(json!({ "command": "refresh" }));
        assert_eq!(run.await.unwrap(), SessionExit::Reload);
        assert_eq!(host.reload_count(), 1);
        assert!(host.stash_get(RESET_PENDING_KEY).await.is_some());

        // The second stage reloads again without touching the network.
        let hits_before = duplex.state.hits.load(Ordering::SeqCst);
        assert_eq!(session.run().await.unwrap(), SessionExit::Reload);
        assert_eq!(duplex.state.hits.load(Ordering::SeqCst), hits_before);
        assert_eq!(host.reload_count(), 2);
        assert!(host.stash_get(RESET_PENDING_KEY).await.is_none());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn reconnect_command_reopens_socket() {
    timeout(TEST_TIMEOUT, async {
        let duplex = start_duplex(json!({})).await;
        let host = SimulatedHost::new();
        let session = make_session(test_config(duplex.port), &host);
        let run = spawn_session(&session);

        let state = Arc::clone(&duplex.state);
        wait_for("first connection", async || {
            state.connections.load(Ordering::SeqCst) == 1
        })
        .await;

        let second_feed = duplex.add_connection_feed().await;
        duplex.send(json!({ "command": "reconnect" }));
        wait_for("second connection", async || {
            state.connections.load(Ordering::SeqCst) == 2
        })
        .await;

        // The fresh socket carries work like the first one did.
        host.script_response(vec![Ok("hi".to_string())]).await;
        second_feed
            .send(Message::Text(work_frame("req-5").to_string().into()))
            .unwrap();
        wait_for("work after reconnect", async || {
            frames_for(&state, "req-5").await.len() == 2
        })
        .await;
        let frames = frames_for(&duplex.state, "req-5").await;
        assert_eq!(frames[0]["data"], "hi");
        assert_eq!(frames[1]["data"], "[DONE]");

        host.unload().await;
        assert_eq!(run.await.unwrap(), SessionExit::Closed);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn capture_command_arms_once_and_reports_ids() {
    timeout(TEST_TIMEOUT, async {
        let (capture_port, updates) = start_capture_listener().await;
        let duplex = start_duplex(json!({ "apiPort": capture_port })).await;
        let host = SimulatedHost::new();
        let session = make_session(test_config(duplex.port), &host);
        let run = spawn_session(&session);

        wait_for("duplex channel connect", async || {
            host.title_decoration().await == "✅ "
        })
        .await;
        duplex.send(json!({ "command": "activateCapture" }));
        // Let the command reach the session before the page fires.
        tokio::time::sleep(Duration::from_millis(100)).await;

        // An app-originated retry call passes through, but its ids are
        // harvested and reported to the local listener.
        let observed = RequestDescriptor::new(
            "PUT",
            format!("/api/stream/retry-evaluation-session-message/{SESSION_ID}/messages/{MESSAGE_ID}"),
        );
        assert!(host.originate_call(observed).await.is_none());

        wait_for("captured id report", async || {
            !updates.lock().await.is_empty()
        })
        .await;
        let reported = updates.lock().await.clone();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0]["sessionId"], SESSION_ID);
        assert_eq!(reported[0]["messageId"], MESSAGE_ID);

        // The capture is one-shot: a second retry call is not reported.
        let second = RequestDescriptor::new(
            "PUT",
            "/api/stream/retry-evaluation-session-message/0000aaaa-1111-4222-8333-444455556666/messages/0000bbbb-1111-4222-8333-444455556666",
        );
        assert!(host.originate_call(second).await.is_none());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(updates.lock().await.len(), 1);
        assert_eq!(host.passthrough_requests().await.len(), 2);

        host.unload().await;
        assert_eq!(run.await.unwrap(), SessionExit::Closed);
    })
    .await
    .expect("test timed out");
}
