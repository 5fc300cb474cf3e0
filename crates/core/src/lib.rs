//! `courier-core`: messaging domain building blocks.
//!
//! Identifiers, group key material and the plain records the storage and
//! transport collaborators hand back. No IO lives here.

pub mod entity;
pub mod error;
pub mod group;
pub mod id;
pub mod model;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use group::{GroupId, GroupMasterKey, GroupPublicParams, GroupSecretParams};
pub use id::{MessageId, RecipientId, ServiceId, ThreadId};
pub use model::{
    ConversationKind, GroupRecord, MessageRecord, Recipient, RegisteredState, ThreadRecord,
};
