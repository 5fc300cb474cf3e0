//! Job manager configuration.

use std::time::Duration;

use anyhow::Context;

use super::types::RetryPolicy;

pub const ENV_POLL_INTERVAL_MS: &str = "COURIER_JOB_POLL_INTERVAL_MS";
pub const ENV_BACKOFF_BASE_MS: &str = "COURIER_JOB_BACKOFF_BASE_MS";
pub const ENV_BACKOFF_MAX_MS: &str = "COURIER_JOB_BACKOFF_MAX_MS";

/// Job manager configuration.
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    /// How often the worker polls for ready jobs when idle
    pub poll_interval: Duration,
    /// Name for logging and the worker thread
    pub name: String,
    /// Backoff for jobs that do not declare their own
    pub default_retry_policy: RetryPolicy,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "job-manager".to_string(),
            default_retry_policy: RetryPolicy::default(),
        }
    }
}

impl JobManagerConfig {
    /// Defaults overridden by `COURIER_JOB_*` environment variables.
    ///
    /// Unset variables keep their default; set but unparsable ones are errors.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse_millis(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = ms;
        }
        if let Some(ms) = parse_millis(&lookup, ENV_BACKOFF_BASE_MS)? {
            config.default_retry_policy.base_delay = ms;
        }
        if let Some(ms) = parse_millis(&lookup, ENV_BACKOFF_MAX_MS)? {
            config.default_retry_policy.max_delay = ms;
        }

        anyhow::ensure!(
            config.default_retry_policy.base_delay <= config.default_retry_policy.max_delay,
            "{ENV_BACKOFF_BASE_MS} must not exceed {ENV_BACKOFF_MAX_MS}"
        );

        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = policy;
        self
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<Duration>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .with_context(|| format!("{key} must be a whole number of milliseconds, got {raw:?}"))
        })
        .transpose()
}
