//! Submit-then-poll state machine for generation jobs.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{JobId, JobStatus, ResponseGenerator};
use crate::error::GeneratorError;

/// Waits between polls. Injected so tests run without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed-interval, bounded polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_polls: 300,
        }
    }
}

/// Where a job is in its lifecycle, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
    Submitted,
    Polling { attempts: u32 },
    Completed(String),
    Failed(Option<String>),
    Cancelled,
    Expired,
}

impl JobPhase {
    /// Apply the result of one poll. Terminal phases never change.
    pub fn advance(self, status: JobStatus) -> JobPhase {
        let attempts = match self {
            Self::Submitted => 1,
            Self::Polling { attempts } => attempts + 1,
            terminal => return terminal,
        };
        match status {
            JobStatus::Pending => Self::Polling { attempts },
            JobStatus::Completed(text) => Self::Completed(text),
            JobStatus::Failed(reason) => Self::Failed(reason),
            JobStatus::Cancelled => Self::Cancelled,
            JobStatus::Expired => Self::Expired,
        }
    }

    /// Polls made so far while the job is still running.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Polling { attempts } => *attempts,
            _ => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted | Self::Polling { .. })
    }
}

/// Submit `prompt` once and poll until the job finishes.
///
/// Submission is never retried. A rate-limited poll counts as an attempt
/// and the loop continues; any other poll error is returned as-is.
pub async fn await_completion(
    generator: &dyn ResponseGenerator,
    sleeper: &dyn Sleeper,
    policy: PollPolicy,
    prompt: &str,
) -> Result<String, GeneratorError> {
    let job = generator.submit(prompt).await?;
    debug!(provider = generator.name(), job = %job, "Submitted generation job");

    let mut phase = JobPhase::Submitted;
    loop {
        let status = match generator.poll(&job).await {
            Ok(status) => status,
            Err(GeneratorError::RateLimited { provider }) => {
                warn!(provider = %provider, job = %job, "Poll rate limited, retrying");
                JobStatus::Pending
            }
            Err(e) => return Err(e),
        };
        phase = phase.advance(status);

        match phase {
            JobPhase::Completed(text) => {
                debug!(job = %job, "Generation job completed");
                return Ok(text);
            }
            JobPhase::Failed(reason) => {
                return Err(terminated(&job, JobStatus::Failed(reason)));
            }
            JobPhase::Cancelled => return Err(terminated(&job, JobStatus::Cancelled)),
            JobPhase::Expired => return Err(terminated(&job, JobStatus::Expired)),
            JobPhase::Submitted | JobPhase::Polling { .. } => {
                let attempts = phase.attempts();
                if attempts >= policy.max_polls {
                    return Err(GeneratorError::PollLimitExceeded {
                        job_id: job.to_string(),
                        attempts,
                    });
                }
                sleeper.sleep(policy.interval).await;
            }
        }
    }
}

fn terminated(job: &JobId, status: JobStatus) -> GeneratorError {
    GeneratorError::JobTerminated {
        job_id: job.to_string(),
        status: status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSleeper, ScriptedGenerator};

    fn policy(max_polls: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(250),
            max_polls,
        }
    }

    #[test]
    fn phase_counts_attempts_until_terminal() {
        let phase = JobPhase::Submitted.advance(JobStatus::Pending);
        assert_eq!(phase, JobPhase::Polling { attempts: 1 });
        let phase = phase.advance(JobStatus::Pending);
        assert_eq!(phase.attempts(), 2);
        let phase = phase.advance(JobStatus::Expired);
        assert_eq!(phase, JobPhase::Expired);
        assert!(phase.is_terminal());
        // Terminal phases ignore further statuses.
        assert_eq!(phase.advance(JobStatus::Pending), JobPhase::Expired);
    }

    #[tokio::test]
    async fn completes_after_pending_polls() {
        let generator = ScriptedGenerator::replying("Hello back")
            .with_statuses(vec![JobStatus::Pending, JobStatus::Pending]);
        let sleeper = RecordingSleeper::default();

        let text = await_completion(&generator, &sleeper, policy(10), "prompt")
            .await
            .unwrap();

        assert_eq!(text, "Hello back");
        assert_eq!(generator.submissions(), vec!["prompt".to_string()]);
        assert_eq!(generator.poll_count(), 3);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(250); 2]);
    }

    #[tokio::test]
    async fn immediate_completion_does_not_sleep() {
        let generator = ScriptedGenerator::replying("done");
        let sleeper = RecordingSleeper::default();
        await_completion(&generator, &sleeper, policy(10), "p").await.unwrap();
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn terminal_failures_are_errors() {
        for status in [
            JobStatus::Failed(Some("server_error".into())),
            JobStatus::Cancelled,
            JobStatus::Expired,
        ] {
            let generator = ScriptedGenerator::replying("unused").with_statuses(vec![status]);
            let err = await_completion(&generator, &RecordingSleeper::default(), policy(10), "p")
                .await
                .unwrap_err();
            assert!(matches!(err, GeneratorError::JobTerminated { .. }), "{err}");
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_polls() {
        let generator =
            ScriptedGenerator::replying("late").with_statuses(vec![JobStatus::Pending; 5]);
        let sleeper = RecordingSleeper::default();

        let err = await_completion(&generator, &sleeper, policy(3), "p")
            .await
            .unwrap_err();

        assert!(matches!(err, GeneratorError::PollLimitExceeded { attempts: 3, .. }));
        assert_eq!(generator.poll_count(), 3);
        assert_eq!(sleeper.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn failed_submit_never_polls() {
        let generator = ScriptedGenerator::replying("x").failing_submit();
        let err = await_completion(&generator, &RecordingSleeper::default(), policy(3), "p")
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::RequestFailed { .. }));
        assert_eq!(generator.poll_count(), 0);
    }
}
