//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Currently being executed
    Running,
    /// Completed successfully
    Completed,
    /// Asked to run again after backoff
    Retrying { attempt: u32 },
    /// Gave up: permanent failure, lifespan exceeded or attempts exhausted
    Failed { reason: String, attempts: u32 },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying { .. })
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Delay policy between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60 * 60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with fixed delays.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                // Unlimited-attempt jobs can reach large attempt numbers.
                let exp = 2_f64.powi((attempt - 1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * (attempt as f64)).min(max_ms),
        };

        // Deterministic "jitter" based on attempt
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

/// Upper bound on how many times a job may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxAttempts {
    #[default]
    Unlimited,
    Limited(u32),
}

impl MaxAttempts {
    /// Whether another run is allowed after `attempt` runs.
    pub fn allows_another(self, attempt: u32) -> bool {
        match self {
            MaxAttempts::Unlimited => true,
            MaxAttempts::Limited(max) => attempt < max,
        }
    }
}

/// Constraint key for jobs that need network connectivity.
pub const NETWORK_CONSTRAINT: &str = "NetworkConstraint";

/// Scheduling parameters a job declares about itself.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobParameters {
    /// Jobs sharing a queue key run one at a time, in order.
    pub queue: Option<String>,
    /// Constraint keys that must all be satisfied before the job runs.
    pub constraints: Vec<String>,
    /// How long after creation the job may still run.
    pub lifespan: Option<Duration>,
    pub max_attempts: MaxAttempts,
    /// Falls back to the manager's configured policy when unset.
    pub retry_policy: Option<RetryPolicy>,
}

impl JobParameters {
    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct JobParametersBuilder {
    inner: JobParameters,
}

impl JobParametersBuilder {
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.inner.queue = Some(queue.into());
        self
    }

    pub fn constraint(mut self, key: impl Into<String>) -> Self {
        self.inner.constraints.push(key.into());
        self
    }

    pub fn lifespan(mut self, lifespan: Duration) -> Self {
        self.inner.lifespan = Some(lifespan);
        self
    }

    pub fn max_attempts(mut self, max_attempts: MaxAttempts) -> Self {
        self.inner.max_attempts = max_attempts;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.inner.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> JobParameters {
        self.inner
    }
}

/// A persisted job: routing key, parameters and the job's own serialized state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,
    /// Routes `payload` back to the factory that can decode it
    pub factory_key: String,
    pub parameters: JobParameters,
    /// Opaque job state, rewritten after every retry
    pub payload: Vec<u8>,
    /// Current status
    pub status: JobStatus,
    /// Current attempt number (starts at 0)
    pub attempt: u32,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job was last updated
    pub updated_at: DateTime<Utc>,
    /// Earliest time of the next run
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Execution history (outcomes of previous attempts)
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl JobRecord {
    pub fn new(factory_key: impl Into<String>, parameters: JobParameters, payload: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            factory_key: factory_key.into(),
            parameters,
            payload,
            status: JobStatus::Pending,
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            history: Vec::new(),
        }
    }

    pub fn queue(&self) -> Option<&str> {
        self.parameters.queue.as_deref()
    }

    /// Check if the job is ready to execute.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_runnable() && self.scheduled_at.is_none_or(|at| now >= at)
    }

    /// Whether the lifespan (if any) has run out at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.parameters.lifespan {
            Some(lifespan) => {
                let lifespan = chrono::Duration::from_std(lifespan).unwrap_or(chrono::Duration::MAX);
                self.created_at
                    .checked_add_signed(lifespan)
                    .is_some_and(|deadline| now >= deadline)
            }
            None => false,
        }
    }

    /// Mark job as running.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    /// Undo a claim that did not run the job (e.g. unmet constraint).
    pub fn mark_deferred(&mut self, retry_at: DateTime<Utc>) {
        self.attempt = self.attempt.saturating_sub(1);
        self.status = if self.attempt == 0 {
            JobStatus::Pending
        } else {
            JobStatus::Retrying {
                attempt: self.attempt,
            }
        };
        self.scheduled_at = Some(retry_at);
        self.updated_at = Utc::now();
    }

    /// Mark job as completed.
    pub fn mark_completed(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.updated_at = now;
        self.scheduled_at = None;
        self.push_history(started_at, now, None);
    }

    /// Schedule another attempt after `delay`.
    pub fn mark_retry(&mut self, started_at: DateTime<Utc>, delay: Duration) {
        let now = Utc::now();
        self.status = JobStatus::Retrying {
            attempt: self.attempt,
        };
        self.updated_at = now;
        self.scheduled_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        self.push_history(started_at, now, Some("retry requested".to_string()));
    }

    /// Mark job as permanently failed.
    pub fn mark_failed(&mut self, reason: impl Into<String>, started_at: DateTime<Utc>) {
        let now = Utc::now();
        let reason = reason.into();
        self.status = JobStatus::Failed {
            reason: reason.clone(),
            attempts: self.attempt,
        };
        self.updated_at = now;
        self.scheduled_at = None;
        self.push_history(started_at, now, Some(reason));
    }

    fn push_history(&mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>, error: Option<String>) {
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at,
            success: error.is_none(),
            error,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_is_capped_for_large_attempts() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(30))
        };

        assert_eq!(policy.delay_for_attempt(500), Duration::from_secs(30));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn max_attempts_limits() {
        assert!(MaxAttempts::Unlimited.allows_another(u32::MAX - 1));
        assert!(MaxAttempts::Limited(3).allows_another(2));
        assert!(!MaxAttempts::Limited(3).allows_another(3));
    }

    #[test]
    fn parameters_builder() {
        let params = JobParameters::builder()
            .queue("RecipientId::1")
            .constraint("NetworkConstraint")
            .lifespan(Duration::from_secs(60))
            .max_attempts(MaxAttempts::Limited(2))
            .build();

        assert_eq!(params.queue.as_deref(), Some("RecipientId::1"));
        assert_eq!(params.constraints, vec!["NetworkConstraint".to_string()]);
        assert_eq!(params.lifespan, Some(Duration::from_secs(60)));
        assert_eq!(params.retry_policy, None);
    }

    #[test]
    fn record_lifecycle() {
        let mut record = JobRecord::new("Test", JobParameters::default(), vec![]);
        assert!(matches!(record.status, JobStatus::Pending));

        record.mark_running();
        assert_eq!(record.attempt, 1);

        record.mark_retry(Utc::now(), Duration::from_secs(5));
        assert_eq!(record.status, JobStatus::Retrying { attempt: 1 });
        assert!(!record.is_ready(Utc::now()));

        record.mark_running();
        record.mark_completed(Utc::now());
        assert!(record.status.is_terminal());
        assert_eq!(record.history.len(), 2);
        assert!(record.history[1].success);
    }

    #[test]
    fn deferred_claim_does_not_consume_an_attempt() {
        let mut record = JobRecord::new("Test", JobParameters::default(), vec![]);
        record.mark_running();
        record.mark_deferred(Utc::now());
        assert_eq!(record.attempt, 0);
        assert_eq!(record.status, JobStatus::Pending);
    }

    #[test]
    fn lifespan_expiry() {
        let mut record = JobRecord::new(
            "Test",
            JobParameters::builder().lifespan(Duration::from_secs(60)).build(),
            vec![],
        );
        let now = Utc::now();
        assert!(!record.is_expired(now));

        record.created_at = now - chrono::Duration::seconds(61);
        assert!(record.is_expired(now));
    }

    #[test]
    fn record_survives_a_storage_round_trip() {
        let mut record = JobRecord::new(
            "Test",
            JobParameters::builder().queue("q").retry_policy(RetryPolicy::default()).build(),
            vec![1, 2, 3],
        );
        record.mark_running();
        record.mark_retry(Utc::now(), Duration::from_secs(1));

        let json = serde_json::to_string(&record).unwrap();
        let restored: JobRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.id, record.id);
        assert_eq!(restored.payload, record.payload);
        assert_eq!(restored.status, record.status);
        assert_eq!(restored.parameters, record.parameters);
    }
}
