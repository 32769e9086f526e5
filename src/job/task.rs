//! The worker's single task slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::job::types::Job;

/// Terminal status reported for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed,
    Failed,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Completed => write!(f, "completed"),
            TaskOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// The task currently holding the slot.
#[derive(Debug, Clone)]
pub struct ActiveTask {
    pub job: Job,
    pub claimed_at: DateTime<Utc>,
}

impl ActiveTask {
    pub fn task_id(&self) -> &str {
        &self.job.task_id
    }
}

/// At most one task is ever active. A second claim is rejected, never
/// queued. The slot is cleared unconditionally once its task reports a
/// terminal status, success or failure alike.
#[derive(Debug, Default)]
pub enum TaskSlot {
    #[default]
    Idle,
    Active(ActiveTask),
}

impl TaskSlot {
    pub fn claim(&mut self, job: Job) -> Result<(), JobError> {
        match self {
            TaskSlot::Active(active) => Err(JobError::WorkerBusy {
                active: active.task_id().to_string(),
                rejected: job.task_id,
            }),
            TaskSlot::Idle => {
                *self = TaskSlot::Active(ActiveTask {
                    job,
                    claimed_at: Utc::now(),
                });
                Ok(())
            }
        }
    }

    pub fn active(&self) -> Option<&ActiveTask> {
        match self {
            TaskSlot::Active(active) => Some(active),
            TaskSlot::Idle => None,
        }
    }

    pub fn active_task_id(&self) -> Option<&str> {
        self.active().map(ActiveTask::task_id)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, TaskSlot::Active(_))
    }

    /// Clear the slot, whatever its state. Returns the evicted task.
    pub fn clear(&mut self) -> Option<ActiveTask> {
        match std::mem::take(self) {
            TaskSlot::Active(active) => Some(active),
            TaskSlot::Idle => None,
        }
    }
}
