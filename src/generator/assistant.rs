//! OpenAI Assistants implementation of [`ResponseGenerator`].
//!
//! A job is one thread holding the prompt plus one run of the configured
//! assistant on it. The job id carries both as `{thread_id}:{run_id}`.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{JobId, JobStatus, ResponseGenerator};
use crate::error::{ConfigError, GeneratorError};

const PROVIDER: &str = "openai";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub assistant_id: String,
}

impl AssistantConfig {
    /// `OPENAI_API_KEY` and `OPENAI_ASSISTANT_ID` are required;
    /// `OPENAI_BASE_URL` is optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };
        Ok(Self {
            base_url: get("OPENAI_BASE_URL")
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: SecretString::from(required("OPENAI_API_KEY")?),
            assistant_id: required("OPENAI_ASSISTANT_ID")?,
        })
    }
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[derive(Deserialize)]
struct Run {
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Deserialize)]
struct RunError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct MessagePage {
    #[serde(default)]
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Deserialize)]
struct TextContent {
    value: String,
}

/// Coarse status for an Assistants run status string.
///
/// Unknown statuses are treated as still running.
pub fn map_run_status(status: &str) -> RunState {
    match status {
        "completed" => RunState::Completed,
        "failed" | "incomplete" => RunState::Failed,
        "cancelled" => RunState::Cancelled,
        "expired" => RunState::Expired,
        _ => RunState::Running,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

pub struct AssistantGenerator {
    config: AssistantConfig,
    http: reqwest::Client,
}

impl AssistantGenerator {
    pub fn new(config: AssistantConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, GeneratorError> {
        let response = request
            .bearer_auth(self.config.api_key.expose_secret())
            .header("OpenAI-Beta", "assistants=v2")
            .send()
            .await
            .map_err(|e| GeneratorError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("{what}: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GeneratorError::AuthFailed {
                    provider: PROVIDER.into(),
                },
                StatusCode::TOO_MANY_REQUESTS => GeneratorError::RateLimited {
                    provider: PROVIDER.into(),
                },
                _ => GeneratorError::RequestFailed {
                    provider: PROVIDER.into(),
                    reason: format!("{what} returned {status}: {body}"),
                },
            });
        }

        response
            .json()
            .await
            .map_err(|e| GeneratorError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: format!("{what}: {e}"),
            })
    }

    async fn latest_reply(&self, thread_id: &str, run_id: &str) -> Result<String, GeneratorError> {
        let request = self
            .http
            .get(self.url(&format!("threads/{thread_id}/messages")))
            .query(&[("order", "desc"), ("limit", "20")]);
        let page: MessagePage = self.call(request, "messages.list").await?;

        let replies: Vec<&ThreadMessage> =
            page.data.iter().filter(|m| m.role == "assistant").collect();
        let message = replies
            .iter()
            .find(|m| m.run_id.as_deref() == Some(run_id))
            .or_else(|| replies.first())
            .ok_or_else(|| GeneratorError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: format!("run {run_id} completed without an assistant message"),
            })?;

        let text: Vec<&str> = message
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_ref().map(|t| t.value.as_str()))
            .collect();
        Ok(text.join("\n"))
    }
}

fn split_job_id(job: &JobId) -> Result<(&str, &str), GeneratorError> {
    job.0
        .split_once(':')
        .ok_or_else(|| GeneratorError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: format!("malformed job id {job}"),
        })
}

#[async_trait]
impl ResponseGenerator for AssistantGenerator {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn submit(&self, prompt: &str) -> Result<JobId, GeneratorError> {
        let thread: Created = self
            .call(
                self.http.post(self.url("threads")).json(&json!({
                    "messages": [{"role": "user", "content": prompt}]
                })),
                "threads.create",
            )
            .await?;

        let run: Created = self
            .call(
                self.http
                    .post(self.url(&format!("threads/{}/runs", thread.id)))
                    .json(&json!({"assistant_id": self.config.assistant_id})),
                "runs.create",
            )
            .await?;

        debug!(thread = %thread.id, run = %run.id, "Started assistant run");
        Ok(JobId(format!("{}:{}", thread.id, run.id)))
    }

    async fn poll(&self, job: &JobId) -> Result<JobStatus, GeneratorError> {
        let (thread_id, run_id) = split_job_id(job)?;
        let run: Run = self
            .call(
                self.http
                    .get(self.url(&format!("threads/{thread_id}/runs/{run_id}"))),
                "runs.retrieve",
            )
            .await?;

        Ok(match map_run_status(&run.status) {
            RunState::Running => JobStatus::Pending,
            RunState::Completed => JobStatus::Completed(self.latest_reply(thread_id, run_id).await?),
            RunState::Failed => JobStatus::Failed(
                run.last_error
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .or(Some(run.status)),
            ),
            RunState::Cancelled => JobStatus::Cancelled,
            RunState::Expired => JobStatus::Expired,
        })
    }
}
