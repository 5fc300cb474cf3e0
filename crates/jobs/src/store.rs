//! Job storage implementations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::types::{JobId, JobRecord, JobStatus};

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    fn enqueue(&self, record: JobRecord) -> Result<JobId, JobStoreError>;

    /// Enqueue several jobs atomically: all are stored or none are.
    fn enqueue_all(&self, records: Vec<JobRecord>) -> Result<Vec<JobId>, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError>;

    /// Update a job.
    fn update(&self, record: &JobRecord) -> Result<(), JobStoreError>;

    /// Claim the oldest ready job whose queue has nothing running, marking it
    /// running. Returns None if no jobs are available.
    fn claim_next(&self) -> Result<Option<JobRecord>, JobStoreError>;

    /// List jobs by status (discriminant match), oldest first.
    fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, JobRecord>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, JobRecord>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, record: JobRecord) -> Result<JobId, JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&record.id) {
            return Err(JobStoreError::AlreadyExists(record.id));
        }
        let id = record.id;
        jobs.insert(id, record);
        Ok(id)
    }

    fn enqueue_all(&self, records: Vec<JobRecord>) -> Result<Vec<JobId>, JobStoreError> {
        let mut jobs = self.write()?;

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if jobs.contains_key(&record.id) || !seen.insert(record.id) {
                return Err(JobStoreError::AlreadyExists(record.id));
            }
        }

        Ok(records
            .into_iter()
            .map(|record| {
                let id = record.id;
                jobs.insert(id, record);
                id
            })
            .collect())
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        Ok(self.read()?.get(&job_id).cloned())
    }

    fn update(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        if !jobs.contains_key(&record.id) {
            return Err(JobStoreError::NotFound(record.id));
        }
        jobs.insert(record.id, record.clone());
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<JobRecord>, JobStoreError> {
        let mut jobs = self.write()?;
        let now = Utc::now();

        let candidate = {
            let busy_queues: HashSet<&str> = jobs
                .values()
                .filter(|j| matches!(j.status, JobStatus::Running))
                .filter_map(|j| j.queue())
                .collect();

            // Within a queue only the oldest unfinished job may run, so a
            // backed-off job keeps its place ahead of newer ones.
            let mut queue_heads: HashMap<&str, &JobRecord> = HashMap::new();
            for job in jobs.values().filter(|j| !j.status.is_terminal()) {
                if let Some(queue) = job.queue() {
                    queue_heads
                        .entry(queue)
                        .and_modify(|head| {
                            if (job.created_at, job.id) < (head.created_at, head.id) {
                                *head = job;
                            }
                        })
                        .or_insert(job);
                }
            }

            jobs.values()
                .filter(|j| j.is_ready(now))
                .filter(|j| match j.queue() {
                    Some(queue) => {
                        !busy_queues.contains(queue)
                            && queue_heads.get(queue).is_some_and(|head| head.id == j.id)
                    }
                    None => true,
                })
                .min_by_key(|j| (j.created_at, j.id))
                .map(|j| j.id)
        };

        Ok(candidate.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_running();
                job.clone()
            })
        }))
    }

    fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| {
                status.as_ref().is_none_or(|s| {
                    std::mem::discriminant(&j.status) == std::mem::discriminant(s)
                })
            })
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.created_at, j.id));
        result.truncate(limit);
        Ok(result)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats::default();

        for job in jobs.values() {
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Retrying { .. } => stats.retrying += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn enqueue(&self, record: JobRecord) -> Result<JobId, JobStoreError> {
        (**self).enqueue(record)
    }

    fn enqueue_all(&self, records: Vec<JobRecord>) -> Result<Vec<JobId>, JobStoreError> {
        (**self).enqueue_all(records)
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).get(job_id)
    }

    fn update(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        (**self).update(record)
    }

    fn claim_next(&self) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).claim_next()
    }

    fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        (**self).list_by_status(status, limit)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }
}
