use std::sync::Mutex;

use courier_jobs::{Job, JobError, JobId, JobOutcome, JobParameters, JobScheduler, JobStoreError};

/// Job that does nothing; tagged so tests can tell submissions apart.
#[derive(Debug)]
pub struct NoopJob {
    pub tag: u32,
    params: JobParameters,
}

impl NoopJob {
    pub fn boxed(tag: u32) -> Box<dyn Job> {
        Box::new(Self {
            tag,
            params: JobParameters::default(),
        })
    }
}

impl Job for NoopJob {
    fn factory_key(&self) -> &'static str {
        "NoopJob"
    }

    fn parameters(&self) -> &JobParameters {
        &self.params
    }

    fn serialize(&self) -> Result<Vec<u8>, JobError> {
        Ok(self.tag.to_be_bytes().to_vec())
    }

    fn run(&mut self) -> JobOutcome {
        JobOutcome::Success
    }
}

/// Records every scheduler call: one entry per call, holding the submitted tags.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    pub calls: Mutex<Vec<Vec<u32>>>,
    pub fail: bool,
}

impl RecordingScheduler {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<u32>> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, jobs: &[Box<dyn Job>]) -> Result<Vec<JobId>, JobError> {
        if self.fail {
            return Err(JobError::Store(JobStoreError::Storage("disk full".to_string())));
        }
        let tags = jobs
            .iter()
            .map(|job| {
                let bytes = job.serialize().unwrap();
                u32::from_be_bytes(bytes.try_into().unwrap())
            })
            .collect();
        self.calls.lock().unwrap().push(tags);
        Ok(jobs.iter().map(|_| JobId::new()).collect())
    }
}

impl JobScheduler for RecordingScheduler {
    fn add(&self, job: Box<dyn Job>) -> Result<JobId, JobError> {
        Ok(self.record(std::slice::from_ref(&job))?[0])
    }

    fn add_all(&self, jobs: Vec<Box<dyn Job>>) -> Result<Vec<JobId>, JobError> {
        self.record(&jobs)
    }
}
