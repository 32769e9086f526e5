//! Claiming jobs into the single task slot and driving prompts into the UI.

use std::time::Duration;

use crate::error::{HostError, JobError};
use crate::host::HostPage;
use crate::job::task::{ActiveTask, TaskSlot};
use crate::job::types::{Job, JobPayload, MessagesPayload};

/// Owns the worker's one task slot. A second job arriving while the
/// slot is occupied is rejected and logged, never queued.
#[derive(Debug, Default)]
pub struct JobConsumer {
    slot: TaskSlot,
}

impl JobConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_claim(&mut self, job: Job) -> Result<(), JobError> {
        let task_id = job.task_id.clone();
        match self.slot.claim(job) {
            Ok(()) => {
                tracing::info!(%task_id, "Claimed task");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%task_id, %err, "Ignoring job while a task is active");
                Err(err)
            }
        }
    }

    /// Whether `task_id` is the task currently in the slot.
    pub fn accepts(&self, task_id: &str) -> bool {
        self.slot.active_task_id() == Some(task_id)
    }

    pub fn active(&self) -> Option<&ActiveTask> {
        self.slot.active()
    }

    pub fn active_task_id(&self) -> Option<&str> {
        self.slot.active_task_id()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// The deferred messages payload, when the active task carries one.
    pub fn claimed_messages(&self) -> Option<&MessagesPayload> {
        match self.slot.active() {
            Some(task) => match &task.job.payload {
                JobPayload::Messages(payload) => Some(payload),
                JobPayload::Prompt(_) => None,
            },
            None => None,
        }
    }

    pub fn clear(&mut self) -> Option<ActiveTask> {
        let cleared = self.slot.clear();
        if let Some(task) = &cleared {
            tracing::info!(task_id = %task.task_id(), "Cleared task slot");
        }
        cleared
    }
}

/// Outcome of driving a prompt into the page's submit control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// The control stayed disabled through the retry. The prompt is
    /// dropped; recovery is the coordinator's job.
    Abandoned,
}

/// Submits `content` through the page UI. A disabled control gets one
/// retry after `retry_delay`; a second refusal abandons the prompt.
pub async fn submit_with_retry(
    host: &dyn HostPage,
    content: &str,
    settle_delay: Duration,
    retry_delay: Duration,
) -> Result<SubmitOutcome, HostError> {
    tokio::time::sleep(settle_delay).await;
    match host.submit_prompt(content).await {
        Ok(()) => return Ok(SubmitOutcome::Submitted),
        Err(HostError::SubmitDisabled) => {
            tracing::debug!("Submit control disabled, retrying once");
        }
        Err(err) => return Err(err),
    }

    tokio::time::sleep(retry_delay).await;
    match host.submit_prompt(content).await {
        Ok(()) => Ok(SubmitOutcome::Submitted),
        Err(HostError::SubmitDisabled) => {
            tracing::warn!("Submit control still disabled, abandoning prompt");
            Ok(SubmitOutcome::Abandoned)
        }
        Err(err) => Err(err),
    }
}
