//! The worker session: one owned context per tab, run as a single
//! cooperatively scheduled event loop.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::config::{BridgeConfig, ChannelMode, RemoteConfig};
use crate::coordinator::duplex::{self, DuplexHandle};
use crate::coordinator::push::{self, PushEvent};
use crate::coordinator::{
    ConnectionManager, ControlCommand, CoordinatorClient, DuplexSink, InboundFrame, LogLevel,
    RemoteLogger, RestSink,
};
use crate::error::{ChainError, Result};
use crate::host::{CallDirective, HostEvent, HostPage};
use crate::identity::{IdentityLease, LeaseStore};
use crate::intercept::{
    Classification, InterceptRules, InterceptorState, RequestDescriptor, build_retry_request,
    classify, rewrite_trigger_request,
};
use crate::job::{
    Job, JobConsumer, JobPayload, MessagesPayload, SubmitOutcome, TaskOutcome, submit_with_retry,
};
use crate::relay::{ChunkStream, ResultSink, fail_task, relay_response};

/// Stash key for the persisted worker id, so a reload resumes the same
/// identity.
pub const WORKER_ID_KEY: &str = "bridge.worker-id";
/// Stash key for the keep-alive flag; echoed back on push connect.
pub const HANGING_KEY: &str = "bridge.hanging";
/// Stash key marking the first half of a two-stage reset.
pub const RESET_PENDING_KEY: &str = "bridge.reset-pending";

const CONNECTED_DECORATION: &str = "✅ ";
const HANGING_DECORATION: &str = "⏳ ";

/// Why a session run ended. `Reload` means the page is reloading and
/// the caller should run a fresh session; `Closed` means stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Reload,
    Closed,
}

/// Per-connection loop state shared by both channel flavors.
struct LoopState {
    consumer: JobConsumer,
    intercept: InterceptorState,
    rules: InterceptRules,
    done_tx: mpsc::UnboundedSender<String>,
}

/// What a duplex inbound frame asks the loop to do next.
enum DuplexVerdict {
    Continue,
    Reconnect,
    Exit(SessionExit),
}

/// One worker: owns its configuration, its page, and its lease store.
/// All mutable state lives inside [`run`](Self::run); nothing survives a
/// reload except what the host stash carries.
pub struct WorkerSession {
    config: BridgeConfig,
    host: Arc<dyn HostPage>,
    store: Arc<dyn LeaseStore>,
}

impl WorkerSession {
    pub fn new(
        config: BridgeConfig,
        host: Arc<dyn HostPage>,
        store: Arc<dyn LeaseStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            host,
            store,
        })
    }

    /// Run the session until the coordinator closes it or the page must
    /// reload. Safe to call again after a `Reload` exit.
    pub async fn run(&self) -> Result<SessionExit> {
        // Second half of a two-stage reset: reload again before touching
        // anything else.
        if self.host.stash_take(RESET_PENDING_KEY).await.is_some() {
            tracing::info!("Finishing two-stage reset");
            self.host.reload().await;
            return Ok(SessionExit::Reload);
        }

        let lease = self.acquire_identity().await?;
        let client =
            CoordinatorClient::new(self.config.coordinator_url.as_str(), lease.worker_id());
        let logger = RemoteLogger::new(client.clone());
        tracing::info!(worker_id = %lease.worker_id(), "Worker session starting");
        logger
            .log(
                LogLevel::Info,
                format!("Worker {} starting", lease.worker_id()),
            )
            .await;

        let remote = self.load_remote_config(&client, &logger).await;
        logger.apply_remote_config(&remote).await;
        self.run_injection_job(&client).await;

        let exit = match self.config.channel {
            ChannelMode::Push => self.run_push(&lease, &client, &logger, &remote).await,
            ChannelMode::Duplex => self.run_duplex(&lease, &client, &logger, &remote).await,
        };

        if let Err(e) = lease.release().await {
            tracing::debug!(error = %e, "Lease release failed");
        }
        self.host.set_title_decoration("").await;
        exit
    }

    async fn acquire_identity(&self) -> Result<IdentityLease> {
        let preferred = match self.host.stash_get(WORKER_ID_KEY).await {
            Some(raw) => raw.parse::<Uuid>().ok(),
            None => None,
        };
        let lease = IdentityLease::acquire(
            self.store.clone(),
            preferred,
            self.config.busy_threshold,
            self.config.gc_threshold,
        )
        .await?;
        self.host
            .stash_put(WORKER_ID_KEY, &lease.worker_id().to_string())
            .await;
        Ok(lease)
    }

    /// Fetch the remote config, retrying on a fixed delay until it
    /// answers. Lines logged here are buffered by the remote logger and
    /// flushed once the config arrives.
    async fn load_remote_config(
        &self,
        client: &CoordinatorClient,
        logger: &RemoteLogger,
    ) -> RemoteConfig {
        loop {
            match client.get_config().await {
                Ok(remote) => {
                    tracing::info!(api_port = ?remote.api_port, "Remote config loaded");
                    return remote;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Config load failed, retrying");
                    logger
                        .log(LogLevel::Warn, format!("Config load failed: {e}"))
                        .await;
                    tokio::time::sleep(self.config.setup_retry_delay).await;
                }
            }
        }
    }

    /// Consult the injection queue once per session start. Injection
    /// jobs run outside the task slot.
    async fn run_injection_job(&self, client: &CoordinatorClient) {
        let job = match client.get_injection_job().await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Injection job fetch failed");
                return;
            }
        };

        tracing::info!(injection_id = %job.injection_id, "Running injection job");
        let error = match self.host.run_injection(&job.payload).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(injection_id = %job.injection_id, error = %e, "Injection failed");
                Some(e.to_string())
            }
        };
        let snapshot = match self.host.page_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Page snapshot failed");
                String::new()
            }
        };
        if let Err(e) = client
            .signal_injection_complete(&job.injection_id, &snapshot, error.as_deref())
            .await
        {
            tracing::warn!(error = %e, "Failed to signal injection completion");
        }
    }

    // ── Push channel ────────────────────────────────────────────────

    async fn run_push(
        &self,
        lease: &IdentityLease,
        client: &CoordinatorClient,
        logger: &RemoteLogger,
        remote: &RemoteConfig,
    ) -> Result<SessionExit> {
        let mut host_events = self.host.start().await?;
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut loop_state = LoopState {
            consumer: JobConsumer::new(),
            intercept: InterceptorState::default(),
            rules: InterceptRules::default(),
            done_tx,
        };
        let mut manager = ConnectionManager::new(self.config.reconnect_delay);
        let mut renewal = tokio::time::interval(self.config.renewal_period);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            manager.connecting();

            // Two-phase discovery: never open the channel with a
            // partially resolved endpoint.
            let port = if self.config.discover_endpoint {
                match client.get_worker_endpoint().await {
                    Ok(port) => Some(port),
                    Err(e) => {
                        tracing::warn!(error = %e, "Endpoint discovery failed");
                        manager.pause_before_retry().await;
                        continue;
                    }
                }
            } else {
                None
            };

            let hanging = self.host.stash_get(HANGING_KEY).await.is_some();
            let url = client.events_url(port, hanging);
            let mut events = match push::connect(client.http(), &url).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Push channel connect failed");
                    manager.pause_before_retry().await;
                    continue;
                }
            };

            manager.established();
            self.refresh_decoration(true).await;
            logger.log(LogLevel::Info, "Push channel connected").await;

            loop {
                tokio::select! {
                    event = events.next() => match event {
                        Some(Ok(event)) => {
                            if let Some(exit) = self
                                .handle_push_event(&mut loop_state, client, logger, remote, event)
                                .await
                            {
                                return Ok(exit);
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Push channel error");
                            break;
                        }
                        None => {
                            tracing::info!("Push channel ended");
                            break;
                        }
                    },
                    event = host_events.next() => match event {
                        Some(event) => {
                            if let Some(exit) = self
                                .handle_host_event(&mut loop_state, client, remote, event)
                                .await
                            {
                                return Ok(exit);
                            }
                        }
                        None => return Ok(SessionExit::Closed),
                    },
                    Some(task_id) = done_rx.recv() => {
                        self.finish_task(&mut loop_state, &task_id);
                    },
                    _ = renewal.tick() => {
                        if let Err(e) = lease.renew().await {
                            tracing::warn!(error = %e, "Lease renewal failed");
                        }
                    },
                    _ = poll.tick(), if self.config.poll_jobs && !loop_state.consumer.is_busy() => {
                        self.poll_jobs_once(&mut loop_state, client, remote).await;
                    },
                }
            }

            self.refresh_decoration(false).await;
            manager.pause_before_retry().await;
        }
    }

    async fn handle_push_event(
        &self,
        loop_state: &mut LoopState,
        client: &CoordinatorClient,
        logger: &RemoteLogger,
        remote: &RemoteConfig,
        event: PushEvent,
    ) -> Option<SessionExit> {
        match event {
            PushEvent::NewJob(job) => {
                self.handle_new_job(loop_state, client, remote, job).await;
                None
            }
            PushEvent::SetHangingStatus { is_hanging } => {
                logger
                    .log(LogLevel::Info, format!("Hanging status set to {is_hanging}"))
                    .await;
                if is_hanging {
                    self.host.stash_put(HANGING_KEY, "1").await;
                } else {
                    self.host.stash_take(HANGING_KEY).await;
                }
                self.refresh_decoration(true).await;
                None
            }
            PushEvent::Refresh => {
                // Hard reset: no further network traffic before the
                // reload, only the stash flag for the second stage.
                tracing::info!("Coordinator requested a refresh");
                self.host.stash_put(RESET_PENDING_KEY, "1").await;
                self.host.reload().await;
                Some(SessionExit::Reload)
            }
            PushEvent::Close => {
                tracing::info!("Coordinator closed this worker");
                Some(SessionExit::Closed)
            }
        }
    }

    /// When idle and polling is on, ask for a prompt job first, then a
    /// messages job.
    async fn poll_jobs_once(
        &self,
        loop_state: &mut LoopState,
        client: &CoordinatorClient,
        remote: &RemoteConfig,
    ) {
        let job = match client.get_prompt_job().await {
            Ok(Some(job)) => Some(job),
            Ok(None) => match client.get_messages_job().await {
                Ok(found) => found,
                Err(e) => {
                    tracing::debug!(error = %e, "Messages job poll failed");
                    None
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "Prompt job poll failed");
                None
            }
        };
        if let Some(job) = job {
            self.handle_new_job(loop_state, client, remote, job).await;
        }
    }

    // ── Duplex channel ──────────────────────────────────────────────

    async fn run_duplex(
        &self,
        lease: &IdentityLease,
        client: &CoordinatorClient,
        logger: &RemoteLogger,
        remote: &RemoteConfig,
    ) -> Result<SessionExit> {
        let mut host_events = self.host.start().await?;
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut loop_state = LoopState {
            consumer: JobConsumer::new(),
            intercept: InterceptorState::default(),
            rules: InterceptRules::default(),
            done_tx,
        };
        let mut manager = ConnectionManager::new(self.config.reconnect_delay);
        let mut renewal = tokio::time::interval(self.config.renewal_period);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            manager.connecting();
            let url = client.ws_url();
            let (handle, mut inbound) = match duplex::connect(&url).await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "Duplex connect failed");
                    manager.pause_before_retry().await;
                    continue;
                }
            };

            manager.established();
            self.refresh_decoration(true).await;
            logger.log(LogLevel::Info, "Duplex channel connected").await;

            let mut skip_retry_pause = false;
            loop {
                tokio::select! {
                    frame = inbound.next() => match frame {
                        Some(Ok(frame)) => {
                            match self
                                .handle_duplex_frame(&mut loop_state, &handle, frame)
                                .await
                            {
                                DuplexVerdict::Continue => {}
                                DuplexVerdict::Reconnect => {
                                    skip_retry_pause = true;
                                    break;
                                }
                                DuplexVerdict::Exit(exit) => return Ok(exit),
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Duplex channel error");
                            break;
                        }
                        None => {
                            tracing::info!("Duplex channel ended");
                            break;
                        }
                    },
                    event = host_events.next() => match event {
                        Some(event) => {
                            if let Some(exit) = self
                                .handle_host_event(&mut loop_state, client, remote, event)
                                .await
                            {
                                return Ok(exit);
                            }
                        }
                        None => return Ok(SessionExit::Closed),
                    },
                    Some(task_id) = done_rx.recv() => {
                        self.finish_task(&mut loop_state, &task_id);
                    },
                    _ = renewal.tick() => {
                        if let Err(e) = lease.renew().await {
                            tracing::warn!(error = %e, "Lease renewal failed");
                        }
                    },
                }
            }

            self.refresh_decoration(false).await;
            if skip_retry_pause {
                // Orderly reconnect: straight back through Down, no pause.
                manager.shutdown();
            } else {
                manager.pause_before_retry().await;
            }
        }
    }

    async fn handle_duplex_frame(
        &self,
        loop_state: &mut LoopState,
        handle: &DuplexHandle,
        frame: InboundFrame,
    ) -> DuplexVerdict {
        match frame {
            InboundFrame::Command { command } => match command {
                ControlCommand::Refresh => {
                    tracing::info!("Coordinator requested a refresh");
                    self.host.stash_put(RESET_PENDING_KEY, "1").await;
                    self.host.reload().await;
                    DuplexVerdict::Exit(SessionExit::Reload)
                }
                ControlCommand::Reconnect => {
                    tracing::info!("Coordinator requested a reconnect");
                    DuplexVerdict::Reconnect
                }
                ControlCommand::ActivateCapture => {
                    if loop_state.intercept.capture.arm() {
                        tracing::info!("Capture mode armed");
                    } else {
                        tracing::debug!(
                            state = %loop_state.intercept.capture,
                            "Capture arm ignored"
                        );
                    }
                    DuplexVerdict::Continue
                }
            },
            InboundFrame::Work {
                request_id,
                payload,
            } => {
                self.run_work_frame(loop_state, handle, request_id, payload)
                    .await;
                DuplexVerdict::Continue
            }
        }
    }

    /// A work frame is a server-driven turn: the bridge itself builds
    /// the retry call and originates it. The request id doubles as the
    /// task id.
    async fn run_work_frame(
        &self,
        loop_state: &mut LoopState,
        handle: &DuplexHandle,
        request_id: String,
        payload: MessagesPayload,
    ) {
        let job = Job {
            task_id: request_id.clone(),
            payload: JobPayload::Messages(payload.clone()),
        };
        if loop_state.consumer.try_claim(job).is_err() {
            // Busy: answer this request id with an error and its
            // terminal marker, leave the active task alone.
            let sink = DuplexSink::new(handle.clone(), request_id.clone());
            fail_task(&request_id, &sink, "worker is busy with another task").await;
            return;
        }

        match build_retry_request(&payload) {
            Ok(request) => {
                loop_state.intercept.rewriting = true;
                match self.host.execute(&request).await {
                    Ok(stream) => {
                        let sink = DuplexSink::new(handle.clone(), request_id.clone());
                        spawn_relay(request_id, stream, sink, loop_state.done_tx.clone());
                    }
                    Err(e) => {
                        tracing::warn!(task_id = %request_id, error = %e, "Work frame execution failed");
                        let sink = DuplexSink::new(handle.clone(), request_id.clone());
                        fail_task(&request_id, &sink, &e.to_string()).await;
                        let _ = loop_state.done_tx.send(request_id);
                    }
                }
            }
            Err(err) => {
                // Terminal for this task: error payload, then the end
                // marker, nothing retried.
                tracing::warn!(task_id = %request_id, error = %err, "Work frame chain build failed");
                let sink = DuplexSink::new(handle.clone(), request_id.clone());
                fail_task(&request_id, &sink, &err.to_string()).await;
                loop_state.consumer.clear();
            }
        }
    }

    // ── Shared event handling ───────────────────────────────────────

    async fn handle_host_event(
        &self,
        loop_state: &mut LoopState,
        client: &CoordinatorClient,
        remote: &RemoteConfig,
        event: HostEvent,
    ) -> Option<SessionExit> {
        match event {
            HostEvent::OutgoingCall {
                request,
                directive_tx,
            } => {
                self.handle_outgoing_call(loop_state, client, remote, request, directive_tx)
                    .await;
                None
            }
            HostEvent::Unloading => {
                tracing::info!("Page is unloading");
                Some(SessionExit::Closed)
            }
        }
    }

    async fn handle_new_job(
        &self,
        loop_state: &mut LoopState,
        client: &CoordinatorClient,
        remote: &RemoteConfig,
        job: Job,
    ) {
        let task_id = job.task_id.clone();
        let prompt = match &job.payload {
            JobPayload::Prompt(p) => Some(p.content.clone()),
            JobPayload::Messages(_) => None,
        };
        if loop_state.consumer.try_claim(job).is_err() {
            return;
        }

        match prompt {
            Some(content) => {
                self.run_prompt_task(loop_state, client, task_id, content)
                    .await;
            }
            None => {
                // Deferred until the page originates its trigger call,
                // unless the coordinator allows server-driven turns and
                // the payload already names the session.
                if !remote.bypass_enabled {
                    return;
                }
                let Some(payload) = loop_state.consumer.claimed_messages().cloned() else {
                    return;
                };
                match build_retry_request(&payload) {
                    Ok(request) => {
                        self.execute_bridge_call(loop_state, client, task_id, request)
                            .await;
                    }
                    Err(ChainError::MissingSessionContext) => {
                        tracing::debug!(%task_id, "Payload names no session, waiting for a page trigger");
                    }
                    Err(err) => {
                        tracing::warn!(%task_id, error = %err, "Chain build failed");
                        let sink = RestSink::new(client.clone(), task_id.clone());
                        fail_task(&task_id, &sink, &err.to_string()).await;
                        loop_state.consumer.clear();
                    }
                }
            }
        }
    }

    /// Drive a prompt into the UI. Submission alone completes the task;
    /// an abandoned submit leaves the slot occupied for the
    /// coordinator's timeout refresh to recover.
    async fn run_prompt_task(
        &self,
        loop_state: &mut LoopState,
        client: &CoordinatorClient,
        task_id: String,
        content: String,
    ) {
        match submit_with_retry(
            self.host.as_ref(),
            &content,
            self.config.submit_settle_delay,
            self.config.submit_retry_delay,
        )
        .await
        {
            Ok(SubmitOutcome::Submitted) => {
                self.report(client, &task_id, TaskOutcome::Completed).await;
                loop_state.consumer.clear();
            }
            Ok(SubmitOutcome::Abandoned) => {}
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "Prompt submission failed");
                self.report(client, &task_id, TaskOutcome::Failed).await;
                loop_state.consumer.clear();
            }
        }
    }

    async fn handle_outgoing_call(
        &self,
        loop_state: &mut LoopState,
        client: &CoordinatorClient,
        remote: &RemoteConfig,
        request: RequestDescriptor,
        directive_tx: oneshot::Sender<CallDirective>,
    ) {
        let verdict = classify(&loop_state.rules, loop_state.intercept.snapshot(), &request);
        match verdict {
            Classification::Trigger => {
                let Some((task_id, payload)) =
                    resolve_trigger_payload(client, &mut loop_state.consumer).await
                else {
                    tracing::warn!("Trigger call with no claimable job, passing through");
                    let _ = directive_tx.send(CallDirective::Proceed);
                    return;
                };
                match rewrite_trigger_request(&request, &payload) {
                    Ok(rewritten) => {
                        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
                        loop_state.intercept.rewriting = true;
                        let directive = CallDirective::Execute {
                            request: rewritten,
                            relay_tx,
                        };
                        if directive_tx.send(directive).is_err() {
                            tracing::warn!(%task_id, "Host dropped the execute directive");
                            loop_state.intercept.rewriting = false;
                            return;
                        }
                        let stream: ChunkStream = Box::pin(UnboundedReceiverStream::new(relay_rx));
                        let sink = RestSink::new(client.clone(), task_id.clone());
                        spawn_relay(task_id, stream, sink, loop_state.done_tx.clone());
                    }
                    Err(err) => {
                        // Terminal: the original call proceeds untouched,
                        // the task fails with two emissions.
                        let _ = directive_tx.send(CallDirective::Proceed);
                        tracing::warn!(%task_id, error = %err, "Trigger rewrite failed");
                        let sink = RestSink::new(client.clone(), task_id.clone());
                        fail_task(&task_id, &sink, &err.to_string()).await;
                        loop_state.consumer.clear();
                    }
                }
            }
            Classification::CapturedPassthrough {
                session_id,
                message_id,
            } => {
                let _ = directive_tx.send(CallDirective::Proceed);
                if !loop_state.intercept.capture.observe() {
                    return;
                }
                match remote.api_port {
                    Some(port) => {
                        if let Err(e) = client
                            .report_captured_ids(port, &session_id, &message_id)
                            .await
                        {
                            tracing::warn!(error = %e, "Captured id report failed");
                        }
                    }
                    None => tracing::warn!("Capture fired but remote config names no apiPort"),
                }
            }
            Classification::BridgeOwned { .. } => {
                tracing::debug!(url = %request.url, "Own call passing through");
                let _ = directive_tx.send(CallDirective::Proceed);
            }
            Classification::Passthrough => {
                let _ = directive_tx.send(CallDirective::Proceed);
            }
        }
    }

    /// Originate a bridge-owned call through the host and relay its
    /// response under `task_id`.
    async fn execute_bridge_call(
        &self,
        loop_state: &mut LoopState,
        client: &CoordinatorClient,
        task_id: String,
        request: RequestDescriptor,
    ) {
        loop_state.intercept.rewriting = true;
        match self.host.execute(&request).await {
            Ok(stream) => {
                let sink = RestSink::new(client.clone(), task_id.clone());
                spawn_relay(task_id, stream, sink, loop_state.done_tx.clone());
            }
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "Bridge-originated call failed");
                let sink = RestSink::new(client.clone(), task_id.clone());
                fail_task(&task_id, &sink, &e.to_string()).await;
                let _ = loop_state.done_tx.send(task_id);
            }
        }
    }

    /// A relay finished: drop the reentrancy guard and free the slot if
    /// the finished task is still the active one.
    fn finish_task(&self, loop_state: &mut LoopState, task_id: &str) {
        loop_state.intercept.rewriting = false;
        if loop_state.consumer.accepts(task_id) {
            loop_state.consumer.clear();
        } else {
            tracing::debug!(task_id, "Relay finished for a task no longer active");
        }
    }

    async fn report(&self, client: &CoordinatorClient, task_id: &str, outcome: TaskOutcome) {
        if let Err(e) = client.report_result(task_id, outcome).await {
            tracing::warn!(task_id, error = %e, "Result report failed");
        }
    }

    /// Compose the title decoration from the link state and the
    /// persisted keep-alive flag.
    async fn refresh_decoration(&self, connected: bool) {
        let hanging = self.host.stash_get(HANGING_KEY).await.is_some();
        let mut decoration = String::new();
        if connected {
            decoration.push_str(CONNECTED_DECORATION);
        }
        if hanging {
            decoration.push_str(HANGING_DECORATION);
        }
        self.host.set_title_decoration(&decoration).await;
    }
}

/// Late binding for triggers: ask the coordinator for the freshest
/// template list first, fall back to the payload claimed at dispatch.
async fn resolve_trigger_payload(
    client: &CoordinatorClient,
    consumer: &mut JobConsumer,
) -> Option<(String, MessagesPayload)> {
    let fetched = match client.get_messages_job().await {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!(error = %e, "Messages job fetch failed, using claimed payload");
            None
        }
    };

    match fetched {
        Some(job) => {
            if !consumer.accepts(&job.task_id) && consumer.try_claim(job.clone()).is_err() {
                return None;
            }
            match job.payload {
                JobPayload::Messages(payload) => Some((job.task_id, payload)),
                JobPayload::Prompt(_) => {
                    tracing::warn!(task_id = %job.task_id, "Messages endpoint returned a prompt job");
                    None
                }
            }
        }
        None => {
            let task_id = consumer.active_task_id()?.to_string();
            let payload = consumer.claimed_messages().cloned()?;
            Some((task_id, payload))
        }
    }
}

fn spawn_relay<S>(
    task_id: String,
    stream: ChunkStream,
    sink: S,
    done_tx: mpsc::UnboundedSender<String>,
) where
    S: ResultSink + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let outcome = relay_response(&task_id, stream, &sink).await;
        tracing::info!(%task_id, %outcome, "Relay finished");
        let _ = done_tx.send(task_id);
    });
}
