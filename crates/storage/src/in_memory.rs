use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use courier_core::{
    Entity, GroupId, GroupRecord, MessageId, MessageRecord, Recipient, RecipientId, RegisteredState,
    ThreadId, ThreadRecord,
};

use crate::error::{StorageError, StorageResult};
use crate::store::{AccountStore, GroupStore, MessageStore, RecipientStore, ThreadStore};

#[derive(Debug, Default)]
struct State {
    registered: bool,
    self_id: Option<RecipientId>,
    recipients: HashMap<RecipientId, Recipient>,
    groups: HashMap<GroupId, GroupRecord>,
    threads: HashMap<ThreadId, ThreadRecord>,
    messages: HashMap<MessageId, MessageRecord>,
    next_sort_position: u64,

    // Bookkeeping for callers that want to observe write amplification.
    thread_updates: HashMap<ThreadId, u64>,
    unregistered_marks: HashMap<RecipientId, u64>,
    transactions: u64,
}

/// In-memory messaging storage.
///
/// Intended for tests/dev. Every public operation takes one lock, so batch
/// operations are atomic with respect to each other.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: RwLock<State>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StorageError::backend("lock poisoned"))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StorageError::backend("lock poisoned"))
    }

    /// Register the local account; `self_recipient` becomes the self recipient.
    pub fn register_self(&self, self_recipient: Recipient) -> StorageResult<()> {
        let mut state = self.write()?;
        state.registered = true;
        state.self_id = Some(self_recipient.id);
        upsert(&mut state.recipients, self_recipient.into_self());
        Ok(())
    }

    pub fn set_registered(&self, registered: bool) -> StorageResult<()> {
        self.write()?.registered = registered;
        Ok(())
    }

    pub fn insert_recipient(&self, recipient: Recipient) -> StorageResult<()> {
        upsert(&mut self.write()?.recipients, recipient);
        Ok(())
    }

    pub fn insert_group(&self, group: GroupRecord) -> StorageResult<()> {
        upsert(&mut self.write()?.groups, group);
        Ok(())
    }

    pub fn remove_group(&self, id: &GroupId) -> StorageResult<()> {
        self.write()?.groups.remove(id);
        Ok(())
    }

    pub fn insert_thread(&self, thread: ThreadRecord) -> StorageResult<()> {
        let mut state = self.write()?;
        state.next_sort_position = state.next_sort_position.max(thread.sort_position + 1);
        upsert(&mut state.threads, thread);
        Ok(())
    }

    pub fn remove_thread(&self, id: ThreadId) -> StorageResult<()> {
        self.write()?.threads.remove(&id);
        Ok(())
    }

    pub fn insert_message(&self, message: MessageRecord) -> StorageResult<()> {
        upsert(&mut self.write()?.messages, message);
        Ok(())
    }

    pub fn thread(&self, id: ThreadId) -> StorageResult<Option<ThreadRecord>> {
        Ok(self.read()?.threads.get(&id).cloned())
    }

    /// How many times the message-insert update was applied to `thread_id`.
    pub fn thread_update_count(&self, thread_id: ThreadId) -> StorageResult<u64> {
        Ok(self
            .read()?
            .thread_updates
            .get(&thread_id)
            .copied()
            .unwrap_or(0))
    }

    /// How many times `mark_unregistered` was called for `id`.
    pub fn unregistered_mark_count(&self, id: RecipientId) -> StorageResult<u64> {
        Ok(self
            .read()?
            .unregistered_marks
            .get(&id)
            .copied()
            .unwrap_or(0))
    }

    /// Number of multi-thread update transactions committed.
    pub fn transaction_count(&self) -> StorageResult<u64> {
        Ok(self.read()?.transactions)
    }
}

fn upsert<E: Entity>(records: &mut HashMap<E::Id, E>, record: E) {
    records.insert(record.id().clone(), record);
}

fn apply_message_insert(state: &mut State, thread_id: ThreadId, unarchive: bool) {
    let position = state.next_sort_position;
    if let Some(thread) = state.threads.get_mut(&thread_id) {
        if unarchive {
            thread.archived = false;
        }
        thread.sort_position = position;
        state.next_sort_position += 1;
        *state.thread_updates.entry(thread_id).or_default() += 1;
    }
}

impl AccountStore for InMemoryStorage {
    fn is_registered(&self) -> StorageResult<bool> {
        Ok(self.read()?.registered)
    }

    fn self_id(&self) -> StorageResult<RecipientId> {
        self.read()?
            .self_id
            .ok_or_else(|| StorageError::not_found("self recipient", "local account"))
    }
}

impl MessageStore for InMemoryStorage {
    fn message_record(&self, id: MessageId) -> StorageResult<MessageRecord> {
        self.read()?
            .messages
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("message", id))
    }

    fn mark_deleted_by(&self, id: MessageId, deleted_by: RecipientId) -> StorageResult<()> {
        let mut state = self.write()?;
        let message = state
            .messages
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("message", id))?;
        message.deleted_by = Some(deleted_by);
        Ok(())
    }
}

impl ThreadStore for InMemoryStorage {
    fn recipient_for_thread(&self, thread_id: ThreadId) -> StorageResult<Option<Recipient>> {
        let state = self.read()?;
        Ok(state
            .threads
            .get(&thread_id)
            .and_then(|t| state.recipients.get(&t.recipient_id))
            .cloned())
    }

    fn update_for_message_insert(&self, thread_id: ThreadId, unarchive: bool) -> StorageResult<()> {
        let mut state = self.write()?;
        if !state.threads.contains_key(&thread_id) {
            return Err(StorageError::not_found("thread", thread_id));
        }
        apply_message_insert(&mut state, thread_id, unarchive);
        Ok(())
    }

    fn update_for_message_insert_batch(
        &self,
        thread_ids: &[ThreadId],
        unarchive: bool,
    ) -> StorageResult<()> {
        let mut state = self.write()?;

        // Validate up front so a missing thread leaves nothing half-applied.
        if let Some(missing) = thread_ids.iter().find(|id| !state.threads.contains_key(*id)) {
            return Err(StorageError::not_found("thread", missing));
        }

        for &thread_id in thread_ids {
            apply_message_insert(&mut state, thread_id, unarchive);
        }
        state.transactions += 1;
        Ok(())
    }
}

impl RecipientStore for InMemoryStorage {
    fn recipient(&self, id: RecipientId) -> StorageResult<Recipient> {
        self.read()?
            .recipients
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("recipient", id))
    }

    fn mark_unregistered(&self, id: RecipientId) -> StorageResult<()> {
        let mut state = self.write()?;
        let recipient = state
            .recipients
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("recipient", id))?;
        if recipient.registered != RegisteredState::NotRegistered {
            tracing::info!(recipient_id = %id, "marking recipient unregistered");
        }
        recipient.registered = RegisteredState::NotRegistered;
        *state.unregistered_marks.entry(id).or_default() += 1;
        Ok(())
    }
}

impl GroupStore for InMemoryStorage {
    fn group(&self, id: &GroupId) -> StorageResult<Option<GroupRecord>> {
        Ok(self.read()?.groups.get(id).cloned())
    }
}
