//! Fan-out of a group admin delete to every member.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use courier_core::{GroupId, MessageId, MessageRecord, Recipient, RecipientId, ServiceId};
use courier_jobs::{
    Job, JobError, JobFactory, JobId, JobOutcome, JobParameters, JobScheduler, MaxAttempts,
    NETWORK_CONSTRAINT,
};
use courier_storage::{MessagingStore, StorageError};

use crate::classify::classify_sends;
use crate::eligibility::partition_eligible;
use crate::transport::{
    AdminDelete, GroupTransport, OutgoingDataMessage, SendResult, TransportError,
};

/// Factory key of [`AdminDeleteSendJob`].
pub const ADMIN_DELETE_SEND_JOB_KEY: &str = "AdminDeleteSendJob";

const LIFESPAN: Duration = Duration::from_secs(24 * 60 * 60);

/// Persisted state of an [`AdminDeleteSendJob`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDeleteJobData {
    pub target_message_id: MessageId,
    /// Who still needs the delete. Only ever shrinks.
    pub remaining_recipients: Vec<RecipientId>,
    pub initial_recipient_count: i32,
}

impl AdminDeleteJobData {
    pub fn encode(&self) -> Result<Vec<u8>, JobError> {
        serde_json::to_vec(self).map_err(|e| JobError::serialize(ADMIN_DELETE_SEND_JOB_KEY, e))
    }

    pub fn decode(data: &[u8]) -> Result<Self, JobError> {
        serde_json::from_slice(data).map_err(|e| JobError::decode(ADMIN_DELETE_SEND_JOB_KEY, e))
    }
}

/// Why a delete can never be sent. Ends the job without a delivery attempt.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PreconditionFailure {
    #[error("not registered")]
    NotRegistered,

    #[error("target message no longer exists")]
    MessageNotFound,

    #[error("missing service id for the target author")]
    AuthorMissingServiceId,

    #[error("have the message but could not find its thread")]
    ThreadNotFound,

    #[error("cannot admin delete outside a V2 group")]
    NotV2Group,

    #[error("group no longer exists")]
    GroupNotFound,

    #[error("not an admin of the group")]
    NotAdmin,
}

enum Halt {
    Precondition(PreconditionFailure),
    Storage(StorageError),
}

impl From<PreconditionFailure> for Halt {
    fn from(failure: PreconditionFailure) -> Self {
        Halt::Precondition(failure)
    }
}

impl From<StorageError> for Halt {
    fn from(error: StorageError) -> Self {
        Halt::Storage(error)
    }
}

/// Everything a run needs once the preconditions hold.
struct Target {
    group_id: GroupId,
    author: ServiceId,
    sent_timestamp: i64,
}

#[derive(Default)]
struct Delivery {
    results: Vec<SendResult>,
    sync_error: Option<TransportError>,
}

/// Sends an admin delete of one group message to the group's members.
///
/// Each run sends only to the recipients still outstanding and drops those
/// reached, unregistered or ineligible; the job succeeds once nobody is left.
pub struct AdminDeleteSendJob<S, T> {
    data: AdminDeleteJobData,
    parameters: JobParameters,
    storage: S,
    transport: T,
}

impl<S, T> fmt::Debug for AdminDeleteSendJob<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminDeleteSendJob")
            .field("data", &self.data)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl<S: MessagingStore, T: GroupTransport> AdminDeleteSendJob<S, T> {
    /// Job targeting every participant of the conversation `message_id` is in.
    ///
    /// `Ok(None)` when the conversation no longer exists.
    pub fn create(storage: S, transport: T, message_id: MessageId) -> Result<Option<Self>, StorageError> {
        let message = storage.message_record(message_id)?;
        let Some(conversation) = storage.recipient_for_thread(message.thread_id)? else {
            return Ok(None);
        };

        let recipients = conversation.participant_ids.clone();
        let parameters = JobParameters::builder()
            .queue(conversation.id.to_queue_key())
            .constraint(NETWORK_CONSTRAINT)
            .lifespan(LIFESPAN)
            .max_attempts(MaxAttempts::Unlimited)
            .build();

        Ok(Some(Self::from_data(
            AdminDeleteJobData {
                target_message_id: message_id,
                initial_recipient_count: i32::try_from(recipients.len()).unwrap_or(i32::MAX),
                remaining_recipients: recipients,
            },
            parameters,
            storage,
            transport,
        )))
    }

    pub fn from_data(data: AdminDeleteJobData, parameters: JobParameters, storage: S, transport: T) -> Self {
        Self {
            data,
            parameters,
            storage,
            transport,
        }
    }

    pub fn data(&self) -> &AdminDeleteJobData {
        &self.data
    }

    pub fn remaining_recipients(&self) -> &[RecipientId] {
        &self.data.remaining_recipients
    }

    fn check_preconditions(&self) -> Result<Target, Halt> {
        if !self.storage.is_registered()? {
            return Err(PreconditionFailure::NotRegistered.into());
        }

        let message = self
            .storage
            .message_record(self.data.target_message_id)
            .map_err(|e| missing_as(e, PreconditionFailure::MessageNotFound))?;
        let author = self.author_of(&message)?;

        let conversation = self
            .storage
            .recipient_for_thread(message.thread_id)?
            .ok_or(PreconditionFailure::ThreadNotFound)?;
        let group_id = match conversation.group_id() {
            Some(id) if conversation.is_push_v2_group() => id,
            _ => return Err(PreconditionFailure::NotV2Group.into()),
        };

        let group = self
            .storage
            .group(&group_id)?
            .ok_or(PreconditionFailure::GroupNotFound)?;
        if !group.is_admin(self.storage.self_id()?) {
            return Err(PreconditionFailure::NotAdmin.into());
        }

        Ok(Target {
            group_id,
            author,
            sent_timestamp: message.date_sent,
        })
    }

    fn author_of(&self, message: &MessageRecord) -> Result<ServiceId, Halt> {
        let author = self
            .storage
            .recipient(message.from_recipient)
            .map_err(|e| missing_as(e, PreconditionFailure::AuthorMissingServiceId))?;
        Ok(author
            .service_id
            .ok_or(PreconditionFailure::AuthorMissingServiceId)?)
    }

    /// Resolve the outstanding recipients. Ids storage no longer knows are
    /// returned separately; they can never be sent to.
    fn resolve_remaining(&self) -> Result<(Vec<Recipient>, Vec<RecipientId>), StorageError> {
        let mut resolved = Vec::with_capacity(self.data.remaining_recipients.len());
        let mut unknown = Vec::new();
        for &id in &self.data.remaining_recipients {
            match self.storage.recipient(id) {
                Ok(recipient) => resolved.push(recipient),
                Err(e) if e.is_not_found() => unknown.push(id),
                Err(e) => return Err(e),
            }
        }
        Ok((resolved, unknown))
    }

    /// Send to everyone in `destinations`. A failed group call fails the
    /// whole delivery; a failed self-sync is returned next to the group
    /// results so completed recipients are still recorded.
    fn deliver(&self, target: &Target, destinations: &[Recipient]) -> Result<Delivery, TransportError> {
        let message = OutgoingDataMessage::admin_delete(
            Utc::now().timestamp_millis(),
            target.group_id,
            AdminDelete {
                target_author: target.author,
                target_sent_timestamp: target.sent_timestamp,
            },
        );

        let (self_destinations, others): (Vec<&Recipient>, Vec<&Recipient>) =
            destinations.iter().partition(|r| r.is_self);
        let others: Vec<Recipient> = others.into_iter().cloned().collect();

        let mut delivery = Delivery::default();
        if !others.is_empty() {
            delivery.results = self.transport.send_group_data_message(
                &target.group_id,
                &others,
                self.data.target_message_id,
                &message,
            )?;
        }

        if let Some(me) = self_destinations.first() {
            match self.transport.send_sync_message(&message) {
                Ok(status) => delivery.results.push(SendResult::new(me.id, status)),
                Err(e) => delivery.sync_error = Some(e),
            }
        }

        Ok(delivery)
    }

    fn drop_recipients(&mut self, ids: &[RecipientId]) {
        self.data.remaining_recipients.retain(|id| !ids.contains(id));
    }

    fn attempt(&mut self) -> JobOutcome {
        let message_id = self.data.target_message_id;

        let target = match self.check_preconditions() {
            Ok(target) => target,
            Err(Halt::Precondition(failure)) => {
                warn!(message_id = %message_id, reason = %failure, "cannot send admin delete");
                return JobOutcome::PermanentFailure(failure.to_string());
            }
            Err(Halt::Storage(e)) => {
                warn!(message_id = %message_id, error = %e, "storage unavailable, retrying");
                return JobOutcome::Retry;
            }
        };

        let (resolved, unknown) = match self.resolve_remaining() {
            Ok(split) => split,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "failed to resolve recipients, retrying");
                return JobOutcome::Retry;
            }
        };

        let (eligible, ineligible) = partition_eligible(resolved);
        let mut dropped: Vec<RecipientId> = ineligible.iter().map(|r| r.id).collect();
        dropped.extend(unknown);
        self.drop_recipients(&dropped);

        let Delivery { results, sync_error } = match self.deliver(&target, &eligible) {
            Ok(delivery) => delivery,
            Err(e) if e.is_retryable() => {
                warn!(message_id = %message_id, error = %e, "send failed, retrying");
                return JobOutcome::Retry;
            }
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "send rejected");
                return JobOutcome::PermanentFailure(e.to_string());
            }
        };

        let destinations: Vec<RecipientId> = eligible.iter().map(|r| r.id).collect();
        let sends = classify_sends(&destinations, &results);
        self.drop_recipients(&sends.completed);

        let mut marked = Vec::with_capacity(sends.unregistered.len());
        for &id in &sends.unregistered {
            match self.storage.mark_unregistered(id) {
                Ok(()) => marked.push(id),
                Err(e) => {
                    warn!(recipient_id = %id, error = %e, "failed to mark recipient unregistered")
                }
            }
        }
        self.drop_recipients(&marked);

        info!(
            message_id = %message_id,
            completed = sends.completed.len(),
            unregistered = marked.len(),
            skipped = dropped.len() + sends.skipped.len(),
            remaining = self.data.remaining_recipients.len(),
            "admin delete send attempt finished"
        );

        match sync_error {
            Some(e) if !e.is_retryable() => {
                warn!(message_id = %message_id, error = %e, "sync copy rejected");
                JobOutcome::PermanentFailure(e.to_string())
            }
            Some(e) => {
                warn!(message_id = %message_id, error = %e, "sync copy failed, retrying");
                JobOutcome::Retry
            }
            None if self.data.remaining_recipients.is_empty() => JobOutcome::Success,
            None => JobOutcome::Retry,
        }
    }
}

fn missing_as(error: StorageError, failure: PreconditionFailure) -> Halt {
    if error.is_not_found() {
        Halt::Precondition(failure)
    } else {
        Halt::Storage(error)
    }
}

impl<S, T> Job for AdminDeleteSendJob<S, T>
where
    S: MessagingStore + 'static,
    T: GroupTransport + 'static,
{
    fn factory_key(&self) -> &'static str {
        ADMIN_DELETE_SEND_JOB_KEY
    }

    fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    fn serialize(&self) -> Result<Vec<u8>, JobError> {
        self.data.encode()
    }

    fn run(&mut self) -> JobOutcome {
        self.attempt()
    }

    fn on_failure(&mut self) {
        let initial = self.data.initial_recipient_count;
        let remaining = i32::try_from(self.data.remaining_recipients.len()).unwrap_or(i32::MAX);
        warn!(
            message_id = %self.data.target_message_id,
            "failed to send admin delete to all recipients! {} / {}",
            initial.saturating_sub(remaining),
            initial
        );
    }
}

/// Rebuilds [`AdminDeleteSendJob`]s from their persisted payload.
#[derive(Debug, Clone)]
pub struct AdminDeleteSendJobFactory<S, T> {
    storage: S,
    transport: T,
}

impl<S, T> AdminDeleteSendJobFactory<S, T> {
    pub fn new(storage: S, transport: T) -> Self {
        Self { storage, transport }
    }
}

impl<S, T> JobFactory for AdminDeleteSendJobFactory<S, T>
where
    S: MessagingStore + Clone + 'static,
    T: GroupTransport + Clone + 'static,
{
    fn create(&self, parameters: JobParameters, data: &[u8]) -> Result<Box<dyn Job>, JobError> {
        let data = AdminDeleteJobData::decode(data)?;
        Ok(Box::new(AdminDeleteSendJob::from_data(
            data,
            parameters,
            self.storage.clone(),
            self.transport.clone(),
        )))
    }
}

#[derive(Debug, Error)]
pub enum AdminDeleteError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Record `deleted_by` on the message locally, then schedule the fan-out.
///
/// Returns `Ok(None)` when the conversation no longer exists; the local
/// marker is still recorded.
pub fn enqueue_admin_delete<S, T, Q>(
    storage: S,
    transport: T,
    scheduler: &Q,
    message_id: MessageId,
    deleted_by: RecipientId,
) -> Result<Option<JobId>, AdminDeleteError>
where
    S: MessagingStore + 'static,
    T: GroupTransport + 'static,
    Q: JobScheduler + ?Sized,
{
    storage.mark_deleted_by(message_id, deleted_by)?;

    let Some(job) = AdminDeleteSendJob::create(storage, transport, message_id)? else {
        warn!(message_id = %message_id, "no conversation for deleted message, nothing to send");
        return Ok(None);
    };

    let recipients = job.remaining_recipients().len();
    let job_id = scheduler.add(Box::new(job))?;
    info!(job_id = %job_id, message_id = %message_id, recipients, "admin delete scheduled");
    Ok(Some(job_id))
}
