//! Durable background jobs with per-queue ordering, constraints and retry.
//!
//! ## Design
//!
//! - Jobs serialize their own state; a factory keyed by `factory_key` rebuilds them
//! - Jobs sharing a queue key run one at a time, oldest first
//! - A retry re-persists whatever the job serializes, so progress survives restarts
//! - Lifespan and attempt limits end a job with `on_failure`
//!
//! ## Components
//!
//! - `Job` / `JobFactory`: the contract job implementations fulfil
//! - `JobScheduler`: where producers submit jobs
//! - `JobStore`: persistence for job records (in-memory here)
//! - `JobManager`: claims, runs and reschedules jobs

pub mod config;
pub mod job;
pub mod manager;
pub mod store;
pub mod types;

pub use config::JobManagerConfig;
pub use job::{Job, JobError, JobFactory, JobOutcome, JobScheduler};
pub use manager::{ConstraintCheck, JobManager, JobManagerHandle, RunReport, RunResult, WorkerStats};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, JobAttemptRecord, JobId, JobParameters, JobParametersBuilder, JobRecord,
    JobStatus, MaxAttempts, RetryPolicy, NETWORK_CONSTRAINT,
};
