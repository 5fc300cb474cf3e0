//! Network transport collaborator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use courier_core::{GroupId, MessageId, Recipient, RecipientId, ServiceId};

/// Delete a group message for everyone, as a group admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminDelete {
    pub target_author: ServiceId,
    pub target_sent_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingDataMessage {
    pub timestamp: i64,
    pub group_id: Option<GroupId>,
    pub admin_delete: Option<AdminDelete>,
}

impl OutgoingDataMessage {
    pub fn admin_delete(timestamp: i64, group_id: GroupId, delete: AdminDelete) -> Self {
        Self {
            timestamp,
            group_id: Some(group_id),
            admin_delete: Some(delete),
        }
    }
}

/// Per-recipient outcome of a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    Delivered,
    /// The service no longer knows this recipient.
    Unregistered,
    /// Not delivered this time; worth retrying.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub recipient: RecipientId,
    pub status: SendStatus,
}

impl SendResult {
    pub fn new(recipient: RecipientId, status: SendStatus) -> Self {
        Self { recipient, status }
    }
}

/// A failure of the whole send call, before any per-recipient outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network unavailable: {0}")]
    Network(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("rejected by the service: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

pub trait GroupTransport: Send + Sync {
    /// Send `message` to `recipients` as one logical group send, attributing
    /// an outcome to each recipient where possible.
    fn send_group_data_message(
        &self,
        group_id: &GroupId,
        recipients: &[Recipient],
        related_message: MessageId,
        message: &OutgoingDataMessage,
    ) -> Result<Vec<SendResult>, TransportError>;

    /// Send a sync copy of `message` to the local account's other devices.
    fn send_sync_message(&self, message: &OutgoingDataMessage) -> Result<SendStatus, TransportError>;
}

impl<T: GroupTransport + ?Sized> GroupTransport for Arc<T> {
    fn send_group_data_message(
        &self,
        group_id: &GroupId,
        recipients: &[Recipient],
        related_message: MessageId,
        message: &OutgoingDataMessage,
    ) -> Result<Vec<SendResult>, TransportError> {
        (**self).send_group_data_message(group_id, recipients, related_message, message)
    }

    fn send_sync_message(&self, message: &OutgoingDataMessage) -> Result<SendStatus, TransportError> {
        (**self).send_sync_message(message)
    }
}

#[derive(Debug, Default)]
struct Script {
    /// Consumed front to back per recipient; the last entry repeats.
    statuses: HashMap<RecipientId, Vec<SendStatus>>,
    call_error: Option<TransportError>,
    sync_status: Option<SendStatus>,
    sync_error: Option<TransportError>,
    sent: Vec<(GroupId, Vec<RecipientId>, OutgoingDataMessage)>,
    syncs: Vec<OutgoingDataMessage>,
}

/// In-memory transport for tests/dev.
///
/// Delivers to everyone unless scripted otherwise and records every call.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // Only test bookkeeping lives behind this lock.
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queue the statuses `recipient` gets on its next sends.
    pub fn script_recipient(&self, recipient: RecipientId, statuses: Vec<SendStatus>) {
        self.script().statuses.insert(recipient, statuses);
    }

    /// Fail the next group send call as a whole.
    pub fn fail_next_call(&self, error: TransportError) {
        self.script().call_error = Some(error);
    }

    /// Fail the next sync send call as a whole.
    pub fn fail_next_sync(&self, error: TransportError) {
        self.script().sync_error = Some(error);
    }

    pub fn script_sync(&self, status: SendStatus) {
        self.script().sync_status = Some(status);
    }

    /// Recipients of each group send, in call order.
    pub fn group_sends(&self) -> Vec<Vec<RecipientId>> {
        self.script()
            .sent
            .iter()
            .map(|(_, recipients, _)| recipients.clone())
            .collect()
    }

    pub fn sent_messages(&self) -> Vec<OutgoingDataMessage> {
        self.script().sent.iter().map(|(_, _, m)| m.clone()).collect()
    }

    pub fn sync_count(&self) -> usize {
        self.script().syncs.len()
    }

    /// Total number of times `recipient` was sent to.
    pub fn sends_to(&self, recipient: RecipientId) -> usize {
        self.script()
            .sent
            .iter()
            .filter(|(_, recipients, _)| recipients.contains(&recipient))
            .count()
    }
}

fn next_status(statuses: Option<&mut Vec<SendStatus>>) -> SendStatus {
    match statuses {
        Some(queue) if queue.len() > 1 => queue.remove(0),
        Some(queue) => queue.first().cloned().unwrap_or(SendStatus::Delivered),
        None => SendStatus::Delivered,
    }
}

impl GroupTransport for ScriptedTransport {
    fn send_group_data_message(
        &self,
        group_id: &GroupId,
        recipients: &[Recipient],
        _related_message: MessageId,
        message: &OutgoingDataMessage,
    ) -> Result<Vec<SendResult>, TransportError> {
        let mut script = self.script();
        if let Some(error) = script.call_error.take() {
            return Err(error);
        }

        script.sent.push((
            *group_id,
            recipients.iter().map(|r| r.id).collect(),
            message.clone(),
        ));
        Ok(recipients
            .iter()
            .map(|r| SendResult::new(r.id, next_status(script.statuses.get_mut(&r.id))))
            .collect())
    }

    fn send_sync_message(&self, message: &OutgoingDataMessage) -> Result<SendStatus, TransportError> {
        let mut script = self.script();
        if let Some(error) = script.sync_error.take() {
            return Err(error);
        }
        script.syncs.push(message.clone());
        Ok(script.sync_status.clone().unwrap_or(SendStatus::Delivered))
    }
}
