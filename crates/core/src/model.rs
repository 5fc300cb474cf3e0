//! Records handed back by the storage collaborator.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::group::GroupId;
use crate::id::{MessageId, RecipientId, ServiceId, ThreadId};

/// Whether the service still knows a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisteredState {
    #[default]
    Unknown,
    Registered,
    NotRegistered,
}

/// What kind of conversation a recipient stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Individual,
    Group(GroupId),
}

/// A resolved recipient: a contact, a group, or the local account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub service_id: Option<ServiceId>,
    pub registered: RegisteredState,
    pub kind: ConversationKind,
    /// Group members; empty for individuals.
    pub participant_ids: Vec<RecipientId>,
    pub is_self: bool,
}

impl Recipient {
    pub fn individual(id: RecipientId, service_id: Option<ServiceId>) -> Self {
        Self {
            id,
            service_id,
            registered: if service_id.is_some() {
                RegisteredState::Registered
            } else {
                RegisteredState::Unknown
            },
            kind: ConversationKind::Individual,
            participant_ids: Vec::new(),
            is_self: false,
        }
    }

    pub fn group(id: RecipientId, group_id: GroupId, participant_ids: Vec<RecipientId>) -> Self {
        Self {
            id,
            service_id: None,
            registered: RegisteredState::Registered,
            kind: ConversationKind::Group(group_id),
            participant_ids,
            is_self: false,
        }
    }

    /// Mark this recipient as the local account.
    pub fn into_self(mut self) -> Self {
        self.is_self = true;
        self
    }

    pub fn has_service_id(&self) -> bool {
        self.service_id.is_some()
    }

    pub fn group_id(&self) -> Option<GroupId> {
        match self.kind {
            ConversationKind::Group(id) => Some(id),
            ConversationKind::Individual => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ConversationKind::Group(_))
    }

    pub fn is_push_v2_group(&self) -> bool {
        matches!(self.kind, ConversationKind::Group(id) if id.is_v2())
    }
}

impl Entity for Recipient {
    type Id = RecipientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Local view of a group's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub revision: u32,
    pub members: Vec<RecipientId>,
    pub admins: Vec<RecipientId>,
}

impl GroupRecord {
    pub fn is_admin(&self, recipient_id: RecipientId) -> bool {
        self.admins.contains(&recipient_id)
    }

    pub fn is_member(&self, recipient_id: RecipientId) -> bool {
        self.members.contains(&recipient_id)
    }
}

impl Entity for GroupRecord {
    type Id = GroupId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub from_recipient: RecipientId,
    /// Sender timestamp in milliseconds; identifies the message on the wire.
    pub date_sent: i64,
    /// Who deleted the message for everyone, if anyone.
    pub deleted_by: Option<RecipientId>,
}

impl Entity for MessageRecord {
    type Id = MessageId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Thread-list state touched when a new incoming message lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub recipient_id: RecipientId,
    pub archived: bool,
    /// Higher sorts first in the thread list.
    pub sort_position: u64,
}

impl Entity for ThreadRecord {
    type Id = ThreadId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
