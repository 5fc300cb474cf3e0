//! Accumulating cache for the batch processing loop.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use courier_core::ThreadId;
use courier_jobs::{Job, JobScheduler};
use courier_storage::ThreadStore;

use crate::cache::{BatchCache, BatchCacheError, LookupCaches, BATCH_SIZE};
use crate::lock::GroupProcessingLock;

/// Side effects waiting for the end of the batch.
#[derive(Debug, Default)]
struct PendingEffects {
    jobs: Vec<Box<dyn Job>>,
    /// Distinct thread ids, in first-seen order.
    thread_ids: Vec<ThreadId>,
    seen_threads: HashSet<ThreadId>,
}

impl PendingEffects {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: Vec::with_capacity(capacity),
            thread_ids: Vec::with_capacity(capacity),
            seen_threads: HashSet::with_capacity(capacity),
        }
    }

    fn add_thread(&mut self, thread_id: ThreadId) {
        if self.seen_threads.insert(thread_id) {
            self.thread_ids.push(thread_id);
        }
    }
}

/// Buffers jobs and thread updates and applies them in bulk on flush.
///
/// Jobs go to the scheduler in one `add_all` call; thread updates are
/// deduplicated and applied in one storage transaction.
#[derive(Debug)]
pub struct ReusedBatchCache<Q, T> {
    lookups: LookupCaches,
    pending: PendingEffects,
    scheduler: Q,
    threads: T,
}

impl<Q: JobScheduler, T: ThreadStore> ReusedBatchCache<Q, T> {
    pub fn new(scheduler: Q, threads: T) -> Self {
        Self {
            lookups: LookupCaches::new(),
            pending: PendingEffects::with_capacity(BATCH_SIZE),
            scheduler,
            threads,
        }
    }

    /// Assert in debug builds that `lock` is held on every lookup.
    pub fn with_lock(mut self, lock: Arc<GroupProcessingLock>) -> Self {
        self.lookups.bind_lock(lock);
        self
    }

    pub fn pending_job_count(&self) -> usize {
        self.pending.jobs.len()
    }

    pub fn pending_thread_count(&self) -> usize {
        self.pending.thread_ids.len()
    }
}

impl<Q: JobScheduler, T: ThreadStore> BatchCache for ReusedBatchCache<Q, T> {
    fn lookups(&self) -> &LookupCaches {
        &self.lookups
    }

    fn lookups_mut(&mut self) -> &mut LookupCaches {
        &mut self.lookups
    }

    fn batches_thread_updates(&self) -> bool {
        true
    }

    fn add_job(&mut self, job: Box<dyn Job>) -> Result<(), BatchCacheError> {
        self.pending.jobs.push(job);
        Ok(())
    }

    fn add_incoming_message_insert_thread_update(
        &mut self,
        thread_id: ThreadId,
    ) -> Result<(), BatchCacheError> {
        self.pending.add_thread(thread_id);
        Ok(())
    }

    fn flush_and_clear(&mut self) -> Result<(), BatchCacheError> {
        self.lookups.clear();

        let pending = std::mem::replace(&mut self.pending, PendingEffects::with_capacity(BATCH_SIZE));

        let jobs_result = if pending.jobs.is_empty() {
            Ok(())
        } else {
            let count = pending.jobs.len();
            self.scheduler
                .add_all(pending.jobs)
                .map(|_| debug!(count, "flushed batched jobs"))
                .map_err(BatchCacheError::from)
        };

        let threads_result = if pending.thread_ids.is_empty() {
            Ok(())
        } else {
            self.threads
                .update_for_message_insert_batch(&pending.thread_ids, true)
                .map(|()| debug!(count = pending.thread_ids.len(), "flushed thread updates"))
                .map_err(BatchCacheError::from)
        };

        if let Err(e) = &jobs_result {
            warn!(error = %e, "failed to flush batched jobs");
        }
        if let Err(e) = &threads_result {
            warn!(error = %e, "failed to flush thread updates");
        }

        jobs_result.and(threads_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::IncomingDataMessage;
    use crate::test_support::{NoopJob, RecordingScheduler};
    use courier_core::{GroupId, GroupMasterKey, GroupRecord, RecipientId, ServiceId, ThreadRecord};
    use courier_storage::{InMemoryStorage, StorageError};
    use proptest::prelude::*;

    fn storage_with_threads(ids: impl IntoIterator<Item = i64>) -> Arc<InMemoryStorage> {
        let storage = Arc::new(InMemoryStorage::new());
        for id in ids {
            storage
                .insert_thread(ThreadRecord {
                    id: ThreadId::new(id),
                    recipient_id: RecipientId::new(100 + id),
                    archived: true,
                    sort_position: 0,
                })
                .unwrap();
        }
        storage
    }

    type TestCache = ReusedBatchCache<Arc<RecordingScheduler>, Arc<InMemoryStorage>>;

    fn cache(storage: &Arc<InMemoryStorage>) -> (TestCache, Arc<RecordingScheduler>) {
        let scheduler = Arc::new(RecordingScheduler::default());
        (
            ReusedBatchCache::new(scheduler.clone(), storage.clone()),
            scheduler,
        )
    }

    #[test]
    fn jobs_are_submitted_in_one_bulk_call_on_flush() {
        let storage = storage_with_threads([]);
        let (mut cache, scheduler) = cache(&storage);

        for tag in 1..=3 {
            cache.add_job(NoopJob::boxed(tag)).unwrap();
        }
        assert!(scheduler.calls().is_empty());
        assert_eq!(cache.pending_job_count(), 3);

        cache.flush_and_clear().unwrap();
        assert_eq!(scheduler.calls(), vec![vec![1, 2, 3]]);

        // Nothing left to resubmit.
        cache.flush_and_clear().unwrap();
        assert_eq!(scheduler.calls().len(), 1);
    }

    #[test]
    fn thread_updates_are_deduplicated_into_one_transaction() {
        let storage = storage_with_threads([1, 2]);
        let (mut cache, _) = cache(&storage);
        assert!(cache.batches_thread_updates());

        for id in [1, 2, 1, 1, 2] {
            cache
                .add_incoming_message_insert_thread_update(ThreadId::new(id))
                .unwrap();
        }
        assert_eq!(cache.pending_thread_count(), 2);
        assert_eq!(storage.thread_update_count(ThreadId::new(1)).unwrap(), 0);

        cache.flush_and_clear().unwrap();

        assert_eq!(storage.thread_update_count(ThreadId::new(1)).unwrap(), 1);
        assert_eq!(storage.thread_update_count(ThreadId::new(2)).unwrap(), 1);
        assert_eq!(storage.transaction_count().unwrap(), 1);
        assert!(!storage.thread(ThreadId::new(2)).unwrap().unwrap().archived);
    }

    #[test]
    fn empty_flush_touches_nothing_but_clears_lookups() {
        let storage = storage_with_threads([]);
        let (mut cache, scheduler) = cache(&storage);
        let group = GroupId::v2([9; 32]);
        cache.lookups_mut().set_group_revision(group, 2);
        cache.lookups_mut().mark_group_queue_empty("queue");
        cache
            .lookups_mut()
            .group_record(group, |id| {
                Ok::<_, StorageError>(Some(GroupRecord {
                    id: *id,
                    revision: 2,
                    members: vec![],
                    admins: vec![],
                }))
            })
            .unwrap();

        cache.flush_and_clear().unwrap();

        assert!(cache.lookups().is_empty());
        assert!(scheduler.calls().is_empty());
        assert_eq!(storage.transaction_count().unwrap(), 0);
    }

    #[test]
    fn failed_flush_propagates_and_is_not_replayed() {
        let storage = storage_with_threads([1]);
        let scheduler = Arc::new(RecordingScheduler::failing());
        let mut cache = ReusedBatchCache::new(scheduler.clone(), storage.clone());
        let message = IncomingDataMessage::new(ServiceId::new(), ThreadId::new(1), 1)
            .in_group(GroupMasterKey::new([5; 32]), 1);

        cache.get_group_info(&message);
        cache.add_job(NoopJob::boxed(1)).unwrap();
        cache
            .add_incoming_message_insert_thread_update(ThreadId::new(1))
            .unwrap();

        let err = cache.flush_and_clear().unwrap_err();
        assert!(matches!(err, BatchCacheError::Jobs(_)));
        assert!(cache.lookups().is_empty());
        // The thread update was still applied once.
        assert_eq!(storage.thread_update_count(ThreadId::new(1)).unwrap(), 1);

        cache.flush_and_clear().unwrap();
        assert_eq!(storage.thread_update_count(ThreadId::new(1)).unwrap(), 1);
        assert_eq!(cache.pending_job_count(), 0);
    }

    #[test]
    fn missing_thread_fails_the_whole_transaction() {
        let storage = storage_with_threads([1]);
        let (mut cache, _) = cache(&storage);
        cache
            .add_incoming_message_insert_thread_update(ThreadId::new(1))
            .unwrap();
        cache
            .add_incoming_message_insert_thread_update(ThreadId::new(99))
            .unwrap();

        let err = cache.flush_and_clear().unwrap_err();
        assert!(matches!(err, BatchCacheError::Threads(ref e) if e.is_not_found()));
        assert_eq!(storage.thread_update_count(ThreadId::new(1)).unwrap(), 0);
    }

    #[test]
    fn group_info_is_none_outside_groups() {
        let storage = storage_with_threads([]);
        let (mut cache, _) = cache(&storage);
        let message = IncomingDataMessage::new(ServiceId::new(), ThreadId::new(1), 1);

        assert_eq!(cache.get_group_info(&message), (None, None));
        assert_eq!(cache.lookups().derivation_count(), 0);
    }

    proptest! {
        #[test]
        fn each_thread_updated_once_per_batch(threads in prop::collection::vec(1i64..6, 1..60)) {
            let storage = storage_with_threads(1..6);
            let (mut cache, _) = cache(&storage);

            for id in &threads {
                cache.add_incoming_message_insert_thread_update(ThreadId::new(*id)).unwrap();
            }
            cache.flush_and_clear().unwrap();

            for id in 1..6 {
                let expected = u64::from(threads.contains(&id));
                prop_assert_eq!(storage.thread_update_count(ThreadId::new(id)).unwrap(), expected);
            }
            prop_assert_eq!(storage.transaction_count().unwrap(), 1);
        }

        #[test]
        fn derivations_bounded_by_distinct_keys_per_batch(
            batches in prop::collection::vec(prop::collection::vec(0u8..4, 0..20), 1..5)
        ) {
            let storage = storage_with_threads([]);
            let (mut cache, _) = cache(&storage);
            let mut expected = 0u64;

            for batch in &batches {
                for byte in batch {
                    let message = IncomingDataMessage::new(ServiceId::new(), ThreadId::new(1), 1)
                        .in_group(GroupMasterKey::new([*byte; 32]), 0);
                    let (_, id) = cache.get_group_info(&message);
                    prop_assert_eq!(id, Some(GroupId::v2_from_master_key(&GroupMasterKey::new([*byte; 32]))));
                }
                expected += batch.iter().collect::<HashSet<_>>().len() as u64;
                cache.flush_and_clear().unwrap();
            }

            prop_assert_eq!(cache.lookups().derivation_count(), expected);
        }
    }
}
