//! Jobs the coordinator hands out and the worker's single task slot.

pub mod consumer;
pub mod task;
pub mod types;

pub use consumer::{JobConsumer, SubmitOutcome, submit_with_retry};
pub use task::{ActiveTask, TaskOutcome, TaskSlot};
pub use types::{Envelope, InjectionJob, Job, JobPayload, MessagesPayload, ModelType, PromptPayload};
