use std::sync::Arc;

use courier_core::{GroupId, GroupRecord, MessageId, MessageRecord, Recipient, RecipientId, ThreadId};

use crate::error::StorageResult;

/// Local account state.
pub trait AccountStore: Send + Sync {
    fn is_registered(&self) -> StorageResult<bool>;

    /// Recipient id of the local account.
    fn self_id(&self) -> StorageResult<RecipientId>;
}

pub trait MessageStore: Send + Sync {
    /// Fails with `NotFound` when no message has this id.
    fn message_record(&self, id: MessageId) -> StorageResult<MessageRecord>;

    /// Record that `deleted_by` removed the message for everyone.
    fn mark_deleted_by(&self, id: MessageId, deleted_by: RecipientId) -> StorageResult<()>;
}

pub trait ThreadStore: Send + Sync {
    /// The conversation recipient owning `thread_id`, if the thread still exists.
    fn recipient_for_thread(&self, thread_id: ThreadId) -> StorageResult<Option<Recipient>>;

    /// Refresh thread-list state after an incoming message was inserted.
    fn update_for_message_insert(&self, thread_id: ThreadId, unarchive: bool) -> StorageResult<()>;

    /// Apply [`ThreadStore::update_for_message_insert`] to every thread in a
    /// single transaction: either all threads are updated or none are.
    fn update_for_message_insert_batch(
        &self,
        thread_ids: &[ThreadId],
        unarchive: bool,
    ) -> StorageResult<()>;
}

pub trait RecipientStore: Send + Sync {
    /// Fails with `NotFound` when no recipient has this id.
    fn recipient(&self, id: RecipientId) -> StorageResult<Recipient>;

    /// Durably record that the service no longer knows `id`. Idempotent.
    fn mark_unregistered(&self, id: RecipientId) -> StorageResult<()>;
}

pub trait GroupStore: Send + Sync {
    fn group(&self, id: &GroupId) -> StorageResult<Option<GroupRecord>>;
}

/// Everything the send path needs from storage.
pub trait MessagingStore:
    AccountStore + MessageStore + ThreadStore + RecipientStore + GroupStore
{
}

impl<T> MessagingStore for T where
    T: AccountStore + MessageStore + ThreadStore + RecipientStore + GroupStore + ?Sized
{
}

impl<S: AccountStore + ?Sized> AccountStore for Arc<S> {
    fn is_registered(&self) -> StorageResult<bool> {
        (**self).is_registered()
    }

    fn self_id(&self) -> StorageResult<RecipientId> {
        (**self).self_id()
    }
}

impl<S: MessageStore + ?Sized> MessageStore for Arc<S> {
    fn message_record(&self, id: MessageId) -> StorageResult<MessageRecord> {
        (**self).message_record(id)
    }

    fn mark_deleted_by(&self, id: MessageId, deleted_by: RecipientId) -> StorageResult<()> {
        (**self).mark_deleted_by(id, deleted_by)
    }
}

impl<S: ThreadStore + ?Sized> ThreadStore for Arc<S> {
    fn recipient_for_thread(&self, thread_id: ThreadId) -> StorageResult<Option<Recipient>> {
        (**self).recipient_for_thread(thread_id)
    }

    fn update_for_message_insert(&self, thread_id: ThreadId, unarchive: bool) -> StorageResult<()> {
        (**self).update_for_message_insert(thread_id, unarchive)
    }

    fn update_for_message_insert_batch(
        &self,
        thread_ids: &[ThreadId],
        unarchive: bool,
    ) -> StorageResult<()> {
        (**self).update_for_message_insert_batch(thread_ids, unarchive)
    }
}

impl<S: RecipientStore + ?Sized> RecipientStore for Arc<S> {
    fn recipient(&self, id: RecipientId) -> StorageResult<Recipient> {
        (**self).recipient(id)
    }

    fn mark_unregistered(&self, id: RecipientId) -> StorageResult<()> {
        (**self).mark_unregistered(id)
    }
}

impl<S: GroupStore + ?Sized> GroupStore for Arc<S> {
    fn group(&self, id: &GroupId) -> StorageResult<Option<GroupRecord>> {
        (**self).group(id)
    }
}
