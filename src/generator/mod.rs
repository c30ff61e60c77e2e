//! Response generation collaborator.
//!
//! A generator accepts a prompt and hands back a job id; the job is then
//! polled until it reaches a terminal status. [`poll::await_completion`]
//! drives that loop, and [`assistant::AssistantGenerator`] is the OpenAI
//! Assistants implementation.

pub mod assistant;
pub mod poll;

use std::fmt;

use async_trait::async_trait;

use crate::error::GeneratorError;
use crate::store::WorkItem;

pub use assistant::{AssistantConfig, AssistantGenerator};
pub use poll::{JobPhase, PollPolicy, Sleeper, TokioSleeper, await_completion};

/// Opaque handle to a submitted generation job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status reported by one poll of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Completed(String),
    Failed(Option<String>),
    Cancelled,
    Expired,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed(_) => write!(f, "completed"),
            Self::Failed(Some(reason)) => write!(f, "failed ({reason})"),
            Self::Failed(None) => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// An asynchronous text generation service.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Short provider name for logs and errors.
    fn name(&self) -> &str;

    /// Start a job for `prompt`. Each call may be billed.
    async fn submit(&self, prompt: &str) -> Result<JobId, GeneratorError>;

    async fn poll(&self, job: &JobId) -> Result<JobStatus, GeneratorError>;
}

/// Prompt sent to the generator for one received email.
pub fn build_prompt(item: &WorkItem) -> String {
    format!(
        "From: {}\nSubject: {}\nMessage: {}",
        item.sender, item.subject, item.body
    )
}
