//! Pass-through cache for messages processed outside the batch loop.

use std::sync::Arc;

use tracing::debug;

use courier_core::ThreadId;
use courier_jobs::{Job, JobScheduler};
use courier_storage::ThreadStore;

use crate::cache::{BatchCache, BatchCacheError, LookupCaches};
use crate::lock::GroupProcessingLock;

/// Applies every side effect as soon as it is requested.
///
/// Used where no batch exists and the group processing lock may not be held,
/// so nothing can safely be deferred or deduplicated. Lookups are still
/// memoized until the flush.
#[derive(Debug)]
pub struct OneTimeBatchCache<Q, T> {
    lookups: LookupCaches,
    scheduler: Q,
    threads: T,
}

impl<Q: JobScheduler, T: ThreadStore> OneTimeBatchCache<Q, T> {
    pub fn new(scheduler: Q, threads: T) -> Self {
        Self {
            lookups: LookupCaches::new(),
            scheduler,
            threads,
        }
    }

    /// Assert in debug builds that `lock` is held on every lookup.
    pub fn with_lock(mut self, lock: Arc<GroupProcessingLock>) -> Self {
        self.lookups.bind_lock(lock);
        self
    }
}

impl<Q: JobScheduler, T: ThreadStore> BatchCache for OneTimeBatchCache<Q, T> {
    fn lookups(&self) -> &LookupCaches {
        &self.lookups
    }

    fn lookups_mut(&mut self) -> &mut LookupCaches {
        &mut self.lookups
    }

    fn batches_thread_updates(&self) -> bool {
        false
    }

    fn add_job(&mut self, job: Box<dyn Job>) -> Result<(), BatchCacheError> {
        let factory_key = job.factory_key();
        let job_id = self.scheduler.add(job)?;
        debug!(job_id = %job_id, factory_key, "job submitted immediately");
        Ok(())
    }

    fn add_incoming_message_insert_thread_update(
        &mut self,
        thread_id: ThreadId,
    ) -> Result<(), BatchCacheError> {
        self.threads.update_for_message_insert(thread_id, true)?;
        Ok(())
    }

    fn flush_and_clear(&mut self) -> Result<(), BatchCacheError> {
        self.lookups.clear();
        Ok(())
    }
}
