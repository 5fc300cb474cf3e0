//! Incoming message batch processing.
//!
//! While a batch of incoming messages is processed the group processing lock
//! is held, so group state cannot change underneath it. A [`BatchCache`]
//! exploits that: it memoizes group lookups for the batch and defers job
//! submission and thread-list refreshes until [`BatchCache::flush_and_clear`].
//!
//! - [`OneTimeBatchCache`]: for a single message processed outside a batch;
//!   side effects happen immediately.
//! - [`ReusedBatchCache`]: for the batch loop; side effects are buffered,
//!   deduplicated and applied in bulk.

pub mod cache;
pub mod lock;
pub mod message;
pub mod one_time;
pub mod processor;
pub mod reused;

#[cfg(test)]
mod test_support;

pub use cache::{BatchCache, BatchCacheError, GroupInfo, LookupCaches, BATCH_SIZE};
pub use lock::{GroupProcessingGuard, GroupProcessingLock};
pub use message::{GroupContextV2, IncomingDataMessage};
pub use one_time::OneTimeBatchCache;
pub use processor::{BatchProcessor, BatchSummary};
pub use reused::ReusedBatchCache;
