//! Per-batch lookup caches and the [`BatchCache`] contract.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use courier_core::{GroupId, GroupMasterKey, GroupRecord, GroupSecretParams, ThreadId};
use courier_jobs::{Job, JobError};
use courier_storage::StorageError;

use crate::lock::GroupProcessingLock;
use crate::message::IncomingDataMessage;

/// Messages per batch; also the initial capacity of every cache.
pub const BATCH_SIZE: usize = 30;

/// Secret params and id of a message's group; both `None` outside groups.
pub type GroupInfo = (Option<GroupSecretParams>, Option<GroupId>);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchCacheError {
    #[error("failed to submit jobs: {0}")]
    Jobs(#[from] JobError),

    #[error("failed to update threads: {0}")]
    Threads(#[from] StorageError),
}

/// Group state memoized for one batch.
///
/// Only valid while the group processing lock is held; cleared in full by
/// [`BatchCache::flush_and_clear`].
#[derive(Debug)]
pub struct LookupCaches {
    group_queue_empty: HashSet<String>,
    group_revisions: HashMap<GroupId, u32>,
    group_records: HashMap<GroupId, Option<GroupRecord>>,
    secret_params_and_ids: HashMap<GroupMasterKey, (GroupSecretParams, GroupId)>,
    derivations: u64,
    lock: Option<Arc<GroupProcessingLock>>,
}

impl Default for LookupCaches {
    fn default() -> Self {
        Self {
            group_queue_empty: HashSet::with_capacity(BATCH_SIZE),
            group_revisions: HashMap::with_capacity(BATCH_SIZE),
            group_records: HashMap::with_capacity(BATCH_SIZE),
            secret_params_and_ids: HashMap::with_capacity(BATCH_SIZE),
            derivations: 0,
            lock: None,
        }
    }
}

impl LookupCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind_lock(&mut self, lock: Arc<GroupProcessingLock>) {
        self.lock = Some(lock);
    }

    fn assert_locked(&self) {
        debug_assert!(
            self.lock.as_ref().is_none_or(|lock| lock.is_held()),
            "batch cache used without holding the group processing lock"
        );
    }

    /// Secret params and id for `key`, derived at most once per batch.
    pub fn group_info(&mut self, key: &GroupMasterKey) -> (GroupSecretParams, GroupId) {
        self.assert_locked();
        let derivations = &mut self.derivations;
        self.secret_params_and_ids
            .entry(*key)
            .or_insert_with(|| {
                *derivations += 1;
                let params = GroupSecretParams::derive_from_master_key(key);
                let id = GroupId::v2(params.public_params().group_identifier());
                (params, id)
            })
            .clone()
    }

    /// How many key derivations this cache has performed over its lifetime.
    pub fn derivation_count(&self) -> u64 {
        self.derivations
    }

    /// The group record for `id`, loading it on first use this batch.
    ///
    /// A confirmed absence is cached too. Loader errors are returned and
    /// nothing is cached for them.
    pub fn group_record<E>(
        &mut self,
        id: GroupId,
        loader: impl FnOnce(&GroupId) -> Result<Option<GroupRecord>, E>,
    ) -> Result<Option<GroupRecord>, E> {
        self.assert_locked();
        if let Some(cached) = self.group_records.get(&id) {
            return Ok(cached.clone());
        }
        let loaded = loader(&id)?;
        self.group_records.insert(id, loaded.clone());
        Ok(loaded)
    }

    pub fn group_revision(&self, id: &GroupId) -> Option<u32> {
        self.assert_locked();
        self.group_revisions.get(id).copied()
    }

    pub fn set_group_revision(&mut self, id: GroupId, revision: u32) {
        self.assert_locked();
        self.group_revisions.insert(id, revision);
    }

    pub fn is_group_queue_empty(&self, marker: &str) -> bool {
        self.assert_locked();
        self.group_queue_empty.contains(marker)
    }

    /// Remember that the group queue named `marker` was found empty.
    /// Returns false if it was already marked this batch.
    pub fn mark_group_queue_empty(&mut self, marker: impl Into<String>) -> bool {
        self.assert_locked();
        self.group_queue_empty.insert(marker.into())
    }

    pub fn is_empty(&self) -> bool {
        self.group_queue_empty.is_empty()
            && self.group_revisions.is_empty()
            && self.group_records.is_empty()
            && self.secret_params_and_ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.group_queue_empty.clear();
        self.group_revisions.clear();
        self.group_records.clear();
        self.secret_params_and_ids.clear();
    }
}

/// Memoization and side-effect deferral for one batch of incoming messages.
pub trait BatchCache {
    fn lookups(&self) -> &LookupCaches;

    fn lookups_mut(&mut self) -> &mut LookupCaches;

    /// Whether thread updates are collected and applied once per batch.
    fn batches_thread_updates(&self) -> bool;

    /// Submit `job` no later than the next flush.
    fn add_job(&mut self, job: Box<dyn Job>) -> Result<(), BatchCacheError>;

    /// Refresh `thread_id` for a newly inserted incoming message no later
    /// than the next flush.
    fn add_incoming_message_insert_thread_update(
        &mut self,
        thread_id: ThreadId,
    ) -> Result<(), BatchCacheError>;

    /// Clear every lookup cache, then apply whatever was deferred.
    ///
    /// Deferred effects are drained before being applied; after an error
    /// they are not retried by a later flush.
    fn flush_and_clear(&mut self) -> Result<(), BatchCacheError>;

    fn get_group_info(&mut self, message: &IncomingDataMessage) -> GroupInfo {
        match &message.group_v2 {
            Some(context) => {
                let (params, id) = self.lookups_mut().group_info(&context.master_key);
                (Some(params), Some(id))
            }
            None => (None, None),
        }
    }
}
