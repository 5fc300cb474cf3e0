//! Job manager: accepts jobs, runs them, applies retry and lifespan limits.

use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::config::JobManagerConfig;
use super::job::{Job, JobError, JobFactory, JobOutcome, JobScheduler};
use super::store::JobStore;
use super::types::{JobId, JobParameters, JobRecord};

/// Constraint check; the job waits while it returns false.
pub type ConstraintCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Completed,
    Retrying { attempt: u32 },
    Failed { reason: String },
    /// Not run; a constraint was unmet. Does not count as an attempt.
    Deferred { constraint: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job_id: JobId,
    pub factory_key: String,
    pub result: RunResult,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct JobManagerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl JobManagerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_run: u64,
    pub jobs_completed: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub jobs_deferred: u64,
    pub uptime_secs: u64,
}

/// Durable job scheduler.
///
/// Jobs are persisted as [`JobRecord`]s and rebuilt through the factory
/// registered under their factory key for every run, so a job resumes from
/// whatever state it serialized after its previous attempt.
pub struct JobManager<S: JobStore> {
    store: S,
    factories: HashMap<String, Box<dyn JobFactory>>,
    constraints: HashMap<String, ConstraintCheck>,
    config: JobManagerConfig,
}

impl<S: JobStore> JobManager<S> {
    pub fn new(store: S, config: JobManagerConfig) -> Self {
        Self {
            store,
            factories: HashMap::new(),
            constraints: HashMap::new(),
            config,
        }
    }

    /// Register the decoder for payloads persisted under `factory_key`.
    pub fn register_factory<F>(&mut self, factory_key: impl Into<String>, factory: F)
    where
        F: JobFactory + 'static,
    {
        self.factories.insert(factory_key.into(), Box::new(factory));
    }

    /// Register the check behind a constraint key.
    pub fn register_constraint<F>(&mut self, key: impl Into<String>, check: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.constraints.insert(key.into(), Box::new(check));
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &JobManagerConfig {
        &self.config
    }

    fn to_record(job: &dyn Job) -> Result<JobRecord, JobError> {
        Ok(JobRecord::new(
            job.factory_key(),
            job.parameters().clone(),
            job.serialize()?,
        ))
    }

    fn unmet_constraint<'a>(&self, parameters: &'a JobParameters) -> Option<&'a str> {
        parameters
            .constraints
            .iter()
            .find(|key| match self.constraints.get(key.as_str()) {
                Some(check) => !check(),
                None => {
                    warn!(constraint = %key, "no check registered for constraint");
                    true
                }
            })
            .map(String::as_str)
    }

    /// Claim and run the next ready job, if any.
    pub fn run_next(&self) -> Result<Option<RunReport>, JobError> {
        let Some(mut record) = self.store.claim_next()? else {
            return Ok(None);
        };

        debug!(
            manager = %self.config.name,
            job_id = %record.id,
            factory_key = %record.factory_key,
            attempt = record.attempt,
            "claimed job"
        );

        let claimed = record.clone();
        let result = self.execute(&mut record);
        if let Err(e) = self.store.update(&record) {
            error!(job_id = %record.id, error = %e, "failed to record job result, releasing claim");
            self.release(claimed);
            return Err(e.into());
        }

        Ok(Some(RunReport {
            job_id: record.id,
            factory_key: record.factory_key,
            result,
        }))
    }

    fn execute(&self, record: &mut JobRecord) -> RunResult {
        let started = Utc::now();

        let mut job = match self.decode(record) {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %record.id, error = %e, "unable to rebuild job");
                return fail(record, e.to_string(), started);
            }
        };

        if record.is_expired(started) {
            warn!(job_id = %record.id, factory_key = %record.factory_key, "lifespan exceeded, giving up");
            job.on_failure();
            return fail(record, "lifespan exceeded", started);
        }

        if let Some(constraint) = self.unmet_constraint(&record.parameters) {
            let constraint = constraint.to_string();
            let retry_at = started
                + chrono::Duration::from_std(self.config.poll_interval).unwrap_or_default();
            record.mark_deferred(retry_at);
            debug!(job_id = %record.id, constraint = %constraint, "constraint unmet, deferring job");
            return RunResult::Deferred { constraint };
        }

        match job.run() {
            JobOutcome::Success => {
                record.mark_completed(started);
                debug!(job_id = %record.id, "job completed successfully");
                RunResult::Completed
            }
            JobOutcome::Retry => {
                if !record.parameters.max_attempts.allows_another(record.attempt) {
                    warn!(job_id = %record.id, attempts = record.attempt, "attempts exhausted, giving up");
                    job.on_failure();
                    return fail(record, "attempts exhausted", started);
                }

                match job.serialize() {
                    Ok(payload) => record.payload = payload,
                    Err(e) => {
                        error!(job_id = %record.id, error = %e, "failed to persist job state");
                        job.on_failure();
                        return fail(record, e.to_string(), started);
                    }
                }

                let policy = record
                    .parameters
                    .retry_policy
                    .as_ref()
                    .unwrap_or(&self.config.default_retry_policy);
                let delay = policy.delay_for_attempt(record.attempt);
                record.mark_retry(started, delay);
                debug!(
                    job_id = %record.id,
                    attempt = record.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "job will retry"
                );
                RunResult::Retrying {
                    attempt: record.attempt,
                }
            }
            JobOutcome::PermanentFailure(reason) => {
                warn!(job_id = %record.id, reason = %reason, "job failed permanently");
                job.on_failure();
                fail(record, reason, started)
            }
        }
    }

    /// Put a claimed job back so its queue is not left blocked.
    fn release(&self, mut claimed: JobRecord) {
        claimed.mark_deferred(Utc::now());
        if let Err(e) = self.store.update(&claimed) {
            error!(job_id = %claimed.id, error = %e, "failed to release job claim");
        }
    }

    fn decode(&self, record: &JobRecord) -> Result<Box<dyn Job>, JobError> {
        let factory = self
            .factories
            .get(&record.factory_key)
            .ok_or_else(|| JobError::UnknownFactory(record.factory_key.clone()))?;
        factory.create(record.parameters.clone(), &record.payload)
    }
}

fn fail(record: &mut JobRecord, reason: impl Into<String>, started: chrono::DateTime<Utc>) -> RunResult {
    let reason = reason.into();
    record.mark_failed(reason.clone(), started);
    RunResult::Failed { reason }
}

impl<S: JobStore> JobScheduler for JobManager<S> {
    fn add(&self, job: Box<dyn Job>) -> Result<JobId, JobError> {
        let record = Self::to_record(job.as_ref())?;
        let id = self.store.enqueue(record)?;
        debug!(job_id = %id, factory_key = job.factory_key(), "job added");
        Ok(id)
    }

    fn add_all(&self, jobs: Vec<Box<dyn Job>>) -> Result<Vec<JobId>, JobError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let records = jobs
            .iter()
            .map(|job| Self::to_record(job.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let ids = self.store.enqueue_all(records)?;
        debug!(count = ids.len(), "jobs added");
        Ok(ids)
    }
}

impl<S: JobStore + 'static> JobManager<S> {
    /// Run jobs on a background thread until the handle is shut down.
    pub fn spawn(self: Arc<Self>) -> std::io::Result<JobManagerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || worker_loop(&self, shutdown_rx, stats_clone))?;

        Ok(JobManagerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop<S: JobStore>(
    manager: &JobManager<S>,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    let name = &manager.config.name;
    info!(manager = %name, "job worker started");
    let start_time = Instant::now();

    loop {
        let outcome = manager.run_next();

        if let Ok(mut s) = stats.lock() {
            s.uptime_secs = start_time.elapsed().as_secs();
            if let Ok(Some(report)) = &outcome {
                s.jobs_run += 1;
                match report.result {
                    RunResult::Completed => s.jobs_completed += 1,
                    RunResult::Retrying { .. } => s.jobs_retried += 1,
                    RunResult::Failed { .. } => s.jobs_failed += 1,
                    RunResult::Deferred { .. } => s.jobs_deferred += 1,
                }
            }
        }

        let idle = match outcome {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(e) => {
                error!(manager = %name, error = %e, "failed to run job");
                true
            }
        };

        let wait = if idle {
            manager.config.poll_interval
        } else {
            std::time::Duration::ZERO
        };
        match shutdown_rx.recv_timeout(wait) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    info!(manager = %name, "job worker stopped");
}
