//! The batch loop: lock, process up to [`BATCH_SIZE`] messages, flush, unlock.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use courier_jobs::JobScheduler;
use courier_storage::ThreadStore;

use crate::cache::{BatchCache, BatchCacheError, BATCH_SIZE};
use crate::lock::GroupProcessingLock;
use crate::message::IncomingDataMessage;
use crate::reused::ReusedBatchCache;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub batches: usize,
    pub processed: usize,
    /// Messages whose handler returned an error; logged and skipped.
    pub failed: usize,
}

/// Drives incoming messages through a [`ReusedBatchCache`].
#[derive(Debug)]
pub struct BatchProcessor<Q, T> {
    cache: ReusedBatchCache<Q, T>,
    lock: Arc<GroupProcessingLock>,
}

impl<Q: JobScheduler, T: ThreadStore> BatchProcessor<Q, T> {
    pub fn new(scheduler: Q, threads: T, lock: Arc<GroupProcessingLock>) -> Self {
        Self {
            cache: ReusedBatchCache::new(scheduler, threads).with_lock(lock.clone()),
            lock,
        }
    }

    /// Process `messages` in batches of [`BATCH_SIZE`].
    ///
    /// Each batch holds the group processing lock from its first message
    /// until its flush completes. A handler error only skips that message;
    /// a flush error stops processing.
    pub fn process<E, F>(
        &mut self,
        messages: &[IncomingDataMessage],
        mut handler: F,
    ) -> Result<BatchSummary, BatchCacheError>
    where
        E: fmt::Display,
        F: FnMut(&IncomingDataMessage, &mut dyn BatchCache) -> Result<(), E>,
    {
        let mut summary = BatchSummary::default();

        for batch in messages.chunks(BATCH_SIZE) {
            let _guard = self.lock.acquire();

            for message in batch {
                match handler(message, &mut self.cache) {
                    Ok(()) => summary.processed += 1,
                    Err(e) => {
                        warn!(
                            sent_timestamp = message.sent_timestamp,
                            thread_id = %message.thread_id,
                            error = %e,
                            "failed to process message"
                        );
                        summary.failed += 1;
                    }
                }
            }

            self.cache.flush_and_clear()?;
            summary.batches += 1;
            debug!(size = batch.len(), "batch processed");
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{NoopJob, RecordingScheduler};
    use courier_core::{RecipientId, ServiceId, ThreadId, ThreadRecord};
    use courier_storage::InMemoryStorage;

    fn setup() -> (
        BatchProcessor<Arc<RecordingScheduler>, Arc<InMemoryStorage>>,
        Arc<RecordingScheduler>,
        Arc<InMemoryStorage>,
    ) {
        courier_observability::init_for_tests();
        let storage = Arc::new(InMemoryStorage::new());
        for id in 1..=3 {
            storage
                .insert_thread(ThreadRecord {
                    id: ThreadId::new(id),
                    recipient_id: RecipientId::new(id),
                    archived: false,
                    sort_position: 0,
                })
                .unwrap();
        }
        let scheduler = Arc::new(RecordingScheduler::default());
        let processor =
            BatchProcessor::new(scheduler.clone(), storage.clone(), GroupProcessingLock::arc());
        (processor, scheduler, storage)
    }

    fn messages(count: usize) -> Vec<IncomingDataMessage> {
        let sender = ServiceId::new();
        (0..count)
            .map(|i| IncomingDataMessage::new(sender, ThreadId::new(i as i64 % 3 + 1), i as i64))
            .collect()
    }

    #[test]
    fn flushes_once_per_batch() {
        let (mut processor, scheduler, storage) = setup();

        let summary = processor
            .process(&messages(65), |message, cache| {
                cache.add_job(NoopJob::boxed(message.sent_timestamp as u32))?;
                cache.add_incoming_message_insert_thread_update(message.thread_id)
            })
            .unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                batches: 3,
                processed: 65,
                failed: 0
            }
        );
        let sizes: Vec<usize> = scheduler.calls().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![30, 30, 5]);
        // One update per thread per batch.
        assert_eq!(storage.thread_update_count(ThreadId::new(1)).unwrap(), 3);
        assert_eq!(storage.transaction_count().unwrap(), 3);
    }

    #[test]
    fn handler_errors_skip_the_message_only() {
        let (mut processor, scheduler, _) = setup();

        let summary = processor
            .process(&messages(4), |message, cache| {
                if message.sent_timestamp == 2 {
                    return Err("undecryptable");
                }
                cache
                    .add_job(NoopJob::boxed(message.sent_timestamp as u32))
                    .map_err(|_| "scheduler")
            })
            .unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(scheduler.calls(), vec![vec![0, 1, 3]]);
    }

    #[test]
    fn lock_is_held_during_handler_and_released_after() {
        let (mut processor, _, _) = setup();
        let lock = processor.lock.clone();

        processor
            .process(&messages(2), |_, _| {
                assert!(lock.is_held());
                Ok::<_, BatchCacheError>(())
            })
            .unwrap();

        assert!(!lock.is_held());
    }

    #[test]
    fn flush_error_stops_processing() {
        let (mut processor, _, _) = setup();
        let summary = processor.process(&messages(40), |message, cache| {
            cache.add_incoming_message_insert_thread_update(ThreadId::new(
                message.thread_id.get() + 10,
            ))
        });

        assert!(matches!(summary, Err(BatchCacheError::Threads(_))));
    }
}
