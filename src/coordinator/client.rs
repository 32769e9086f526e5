//! HTTP client for the coordinator's REST surface.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::RemoteConfig;
use crate::error::{ConfigError, ConnectionError, JobError};
use crate::job::TaskOutcome;
use crate::job::types::{Envelope, InjectionJob, Job};

/// Client for the coordinator's HTTP endpoints. Cheap to clone; every
/// request is tagged with this worker's identity where the contract
/// expects it.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    base_url: String,
    worker_id: Uuid,
    http: Client,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>, worker_id: Uuid) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            worker_id,
            http: Client::new(),
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Push endpoint URL. `port` switches host port in the multi-endpoint
    /// variant; the hanging flag echoes our persisted state back.
    pub fn events_url(&self, port: Option<u16>, hanging: bool) -> String {
        let base = match port {
            Some(port) => with_port(&self.base_url, port),
            None => self.base_url.clone(),
        };
        format!(
            "{base}/events?workerId={}&hanging={}",
            self.worker_id,
            if hanging { '1' } else { '0' }
        )
    }

    /// Duplex endpoint URL, scheme-swapped from the base.
    pub fn ws_url(&self) -> String {
        format!("{}/ws", self.base_url.replacen("http", "ws", 1))
    }

    // ── Setup phase ─────────────────────────────────────────────────

    /// Fetch coordinator-issued config. First call of every session.
    pub async fn get_config(&self) -> Result<RemoteConfig, ConfigError> {
        let url = format!("{}?workerId={}", self.api_url("get_config"), self.worker_id);
        let response =
            self.http
                .get(&url)
                .send()
                .await
                .map_err(|e| ConfigError::RemoteLoadFailed {
                    reason: e.to_string(),
                })?;
        if !response.status().is_success() {
            return Err(ConfigError::RemoteLoadFailed {
                reason: format!("status {} from {url}", response.status()),
            });
        }
        response
            .json()
            .await
            .map_err(|e| ConfigError::RemoteLoadFailed {
                reason: e.to_string(),
            })
    }

    /// Resolve the per-worker push port (multi-endpoint variant). The
    /// push channel must not open until this yields a concrete port.
    pub async fn get_worker_endpoint(&self) -> Result<u16, ConnectionError> {
        #[derive(Deserialize)]
        struct EndpointReply {
            status: Option<String>,
            port: Option<u16>,
        }

        let url = format!(
            "{}?workerId={}",
            self.api_url("get_worker_endpoint"),
            self.worker_id
        );
        let response =
            self.http
                .get(&url)
                .send()
                .await
                .map_err(|e| ConnectionError::RequestFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
        if !response.status().is_success() {
            return Err(ConnectionError::BadStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        let reply: EndpointReply =
            response
                .json()
                .await
                .map_err(|e| ConnectionError::RequestFailed {
                    url,
                    reason: e.to_string(),
                })?;

        match (reply.status.as_deref(), reply.port) {
            (Some("success"), Some(port)) => Ok(port),
            (status, _) => Err(ConnectionError::EndpointUnavailable {
                status: status.unwrap_or("missing").to_string(),
            }),
        }
    }

    // ── Job fetches ─────────────────────────────────────────────────

    pub async fn get_prompt_job(&self) -> Result<Option<Job>, JobError> {
        self.fetch_job(self.api_url("get_prompt_job")).await
    }

    pub async fn get_messages_job(&self) -> Result<Option<Job>, JobError> {
        let url = format!(
            "{}?workerId={}",
            self.api_url("get_messages_job"),
            self.worker_id
        );
        self.fetch_job(url).await
    }

    pub async fn get_injection_job(&self) -> Result<Option<InjectionJob>, JobError> {
        self.fetch_job(self.api_url("get_injection_job")).await
    }

    /// An empty reply body or a non-success envelope both mean no work.
    async fn fetch_job<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
    ) -> Result<Option<T>, JobError> {
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| JobError::FetchFailed {
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(JobError::FetchFailed {
                reason: format!("status {} from {url}", response.status()),
            });
        }
        let text = response.text().await.map_err(|e| JobError::FetchFailed {
            reason: e.to_string(),
        })?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| JobError::FetchFailed {
                reason: e.to_string(),
            })?;
        Ok(envelope.into_job())
    }

    // ── Reporting ───────────────────────────────────────────────────

    pub async fn post_log(&self, level: &str, message: &str) -> Result<(), ConnectionError> {
        let url = format!("{}?workerId={}", self.api_url("log"), self.worker_id);
        self.post_json(
            &url,
            &json!({
                "level": level,
                "message": message,
                "workerId": self.worker_id,
            }),
        )
        .await
    }

    pub async fn post_chunk(&self, task_id: &str, chunk: &str) -> Result<(), ConnectionError> {
        self.post_json(
            &self.api_url("stream_chunk"),
            &json!({
                "taskId": task_id,
                "workerId": self.worker_id,
                "chunk": chunk,
            }),
        )
        .await
    }

    pub async fn report_result(
        &self,
        task_id: &str,
        outcome: TaskOutcome,
    ) -> Result<(), ConnectionError> {
        self.post_json(
            &self.api_url("report_result"),
            &json!({
                "taskId": task_id,
                "workerId": self.worker_id,
                "status": outcome,
            }),
        )
        .await
    }

    pub async fn signal_injection_complete(
        &self,
        injection_id: &str,
        page_snapshot: &str,
        error: Option<&str>,
    ) -> Result<(), ConnectionError> {
        let mut body = json!({
            "injectionId": injection_id,
            "pageSnapshot": page_snapshot,
        });
        if let Some(error) = error {
            body["error"] = json!(error);
        }
        self.post_json(&self.api_url("signal_injection_complete"), &body)
            .await
    }

    /// Report harvested session ids to the capture listener, which runs
    /// on the local machine at the port the remote config names.
    pub async fn report_captured_ids(
        &self,
        api_port: u16,
        session_id: &str,
        message_id: &str,
    ) -> Result<(), ConnectionError> {
        let url = format!("http://127.0.0.1:{api_port}/update");
        self.post_json(
            &url,
            &json!({
                "sessionId": session_id,
                "messageId": message_id,
            }),
        )
        .await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(), ConnectionError> {
        let response = self.http.post(url).json(body).send().await.map_err(|e| {
            ConnectionError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ConnectionError::BadStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            })
        }
    }
}

fn with_port(base: &str, port: u16) -> String {
    let (scheme, rest) = base.split_once("://").unwrap_or(("http", base));
    let host = rest.split([':', '/']).next().unwrap_or(rest);
    format!("{scheme}://{host}:{port}")
}
