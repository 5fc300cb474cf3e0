use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use courier_core::{GroupMasterKey, RecipientId, ServiceId, ThreadId, ThreadRecord};
use courier_jobs::{InMemoryJobStore, Job, JobError, JobManager, JobManagerConfig, JobOutcome, JobParameters};
use courier_messages::{
    BatchCache, BatchProcessor, GroupProcessingLock, IncomingDataMessage, OneTimeBatchCache,
};
use courier_storage::InMemoryStorage;
use std::sync::Arc;

/// Stand-in for a receipt job queued per incoming message.
#[derive(Debug)]
struct ReceiptJob {
    timestamp: i64,
    params: JobParameters,
}

impl Job for ReceiptJob {
    fn factory_key(&self) -> &'static str {
        "ReceiptJob"
    }

    fn parameters(&self) -> &JobParameters {
        &self.params
    }

    fn serialize(&self) -> Result<Vec<u8>, JobError> {
        Ok(self.timestamp.to_be_bytes().to_vec())
    }

    fn run(&mut self) -> JobOutcome {
        JobOutcome::Success
    }
}

fn receipt(timestamp: i64) -> Box<dyn Job> {
    Box::new(ReceiptJob {
        timestamp,
        params: JobParameters::default(),
    })
}

fn setup(threads: i64) -> (Arc<JobManager<Arc<InMemoryJobStore>>>, Arc<InMemoryStorage>) {
    let storage = Arc::new(InMemoryStorage::new());
    for id in 0..threads {
        storage
            .insert_thread(ThreadRecord {
                id: ThreadId::new(id),
                recipient_id: RecipientId::new(id),
                archived: false,
                sort_position: 0,
            })
            .unwrap();
    }
    let manager = Arc::new(JobManager::new(
        InMemoryJobStore::arc(),
        JobManagerConfig::default(),
    ));
    (manager, storage)
}

fn messages(count: usize, threads: i64) -> Vec<IncomingDataMessage> {
    let sender = ServiceId::new();
    let key = GroupMasterKey::new([7; 32]);
    (0..count)
        .map(|i| {
            IncomingDataMessage::new(sender, ThreadId::new(i as i64 % threads), i as i64)
                .in_group(key, 1)
        })
        .collect()
}

fn handle(message: &IncomingDataMessage, cache: &mut dyn BatchCache) -> Result<(), String> {
    black_box(cache.get_group_info(message));
    cache
        .add_job(receipt(message.sent_timestamp))
        .map_err(|e| e.to_string())?;
    cache
        .add_incoming_message_insert_thread_update(message.thread_id)
        .map_err(|e| e.to_string())
}

fn bench_batched_vs_one_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("incoming_messages");

    for threads in [1, 5, 30].iter() {
        let input = messages(300, *threads);
        group.throughput(Throughput::Elements(input.len() as u64));

        group.bench_with_input(BenchmarkId::new("reused_batch_cache", threads), threads, |b, &threads| {
            let (manager, storage) = setup(threads);
            let mut processor = BatchProcessor::new(manager, storage, GroupProcessingLock::arc());
            b.iter(|| black_box(processor.process(&input, handle).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("one_time_batch_cache", threads), threads, |b, &threads| {
            let (manager, storage) = setup(threads);
            let mut cache = OneTimeBatchCache::new(manager, storage);
            b.iter(|| {
                for message in &input {
                    handle(message, &mut cache).unwrap();
                    cache.flush_and_clear().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_batched_vs_one_time);
criterion_main!(benches);
