//! The job contract between job implementations and the scheduler.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::store::JobStoreError;
use super::types::{JobId, JobParameters};

/// Result of one job invocation.
///
/// The scheduler owns retry timing; the job only decides which way to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Done; never run again.
    Success,
    /// Run again after backoff, with whatever state the job now serializes.
    Retry,
    /// Give up without further attempts.
    PermanentFailure(String),
}

/// A unit of durable background work.
pub trait Job: Send + fmt::Debug {
    /// Stable key routing a persisted payload back to its [`JobFactory`].
    fn factory_key(&self) -> &'static str;

    fn parameters(&self) -> &JobParameters;

    /// Current state, as handed back to the factory on the next run.
    fn serialize(&self) -> Result<Vec<u8>, JobError>;

    fn run(&mut self) -> JobOutcome;

    /// Called once when the scheduler gives up on the job.
    fn on_failure(&mut self) {}
}

/// Rebuilds a job from its persisted payload.
pub trait JobFactory: Send + Sync {
    fn create(&self, parameters: JobParameters, data: &[u8]) -> Result<Box<dyn Job>, JobError>;
}

impl<F> JobFactory for F
where
    F: Fn(JobParameters, &[u8]) -> Result<Box<dyn Job>, JobError> + Send + Sync,
{
    fn create(&self, parameters: JobParameters, data: &[u8]) -> Result<Box<dyn Job>, JobError> {
        self(parameters, data)
    }
}

/// Accepts jobs for later execution.
pub trait JobScheduler: Send + Sync {
    fn add(&self, job: Box<dyn Job>) -> Result<JobId, JobError>;

    /// Submit many jobs with one store round trip.
    fn add_all(&self, jobs: Vec<Box<dyn Job>>) -> Result<Vec<JobId>, JobError>;
}

impl<S: JobScheduler + ?Sized> JobScheduler for Arc<S> {
    fn add(&self, job: Box<dyn Job>) -> Result<JobId, JobError> {
        (**self).add(job)
    }

    fn add_all(&self, jobs: Vec<Box<dyn Job>>) -> Result<Vec<JobId>, JobError> {
        (**self).add_all(jobs)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("failed to serialize {factory_key}: {reason}")]
    Serialize {
        factory_key: &'static str,
        reason: String,
    },

    #[error("failed to decode {factory_key}: {reason}")]
    Decode { factory_key: String, reason: String },

    #[error("no factory registered for {0}")]
    UnknownFactory(String),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

impl JobError {
    pub fn serialize(factory_key: &'static str, reason: impl ToString) -> Self {
        Self::Serialize {
            factory_key,
            reason: reason.to_string(),
        }
    }

    pub fn decode(factory_key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            factory_key: factory_key.into(),
            reason: reason.to_string(),
        }
    }
}
