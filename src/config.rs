//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::generator::PollPolicy;

/// Labels watched when `MAIL_RELAY_LABELS` is unset.
pub const DEFAULT_LABELS: [&str; 2] = ["Beginner", "Transfers"];

/// Placeholder sender; Gmail replaces it with the authenticated address.
pub const DEFAULT_FROM_ADDRESS: &str = "me@localhost";

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Directory holding the three store scopes.
    pub root_dir: PathBuf,
    /// Mailbox label names to ingest from.
    pub labels: Vec<String>,
    /// Generation jobs in flight at once (1 = sequential).
    pub generation_concurrency: usize,
    pub poll: PollPolicy,
    /// `From` address of outgoing replies.
    pub from_address: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            generation_concurrency: 1,
            poll: PollPolicy::default(),
            from_address: DEFAULT_FROM_ADDRESS.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Build config from `MAIL_RELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable source. Unset or blank
    /// variables keep their defaults; unparsable ones are errors.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let labels = match get("MAIL_RELAY_LABELS") {
            Some(raw) => {
                let labels: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if labels.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "MAIL_RELAY_LABELS".into(),
                        message: "no label names given".into(),
                    });
                }
                labels
            }
            None => defaults.labels,
        };

        let generation_concurrency: usize = parse_or(
            get("MAIL_RELAY_GENERATION_CONCURRENCY"),
            "MAIL_RELAY_GENERATION_CONCURRENCY",
            defaults.generation_concurrency,
        )?;
        if generation_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAIL_RELAY_GENERATION_CONCURRENCY".into(),
                message: "must be at least 1".into(),
            });
        }

        let interval_ms: u64 = parse_or(
            get("MAIL_RELAY_POLL_INTERVAL_MS"),
            "MAIL_RELAY_POLL_INTERVAL_MS",
            defaults.poll.interval.as_millis() as u64,
        )?;
        let max_polls: u32 = parse_or(
            get("MAIL_RELAY_MAX_POLLS"),
            "MAIL_RELAY_MAX_POLLS",
            defaults.poll.max_polls,
        )?;

        Ok(Self {
            root_dir: get("MAIL_RELAY_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.root_dir),
            labels,
            generation_concurrency,
            poll: PollPolicy {
                interval: Duration::from_millis(interval_ms),
                max_polls: max_polls.max(1),
            },
            from_address: get("MAIL_RELAY_FROM").unwrap_or(defaults.from_address),
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
