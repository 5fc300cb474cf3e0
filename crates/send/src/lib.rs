//! Outgoing sends that fan out to many recipients.
//!
//! [`AdminDeleteSendJob`] delivers an admin delete to every member of a
//! group, persisting who is still outstanding so retries and restarts only
//! target recipients that have not been reached yet.

pub mod admin_delete;
pub mod classify;
pub mod eligibility;
pub mod transport;

pub use admin_delete::{
    enqueue_admin_delete, AdminDeleteError, AdminDeleteJobData, AdminDeleteSendJob,
    AdminDeleteSendJobFactory, PreconditionFailure, ADMIN_DELETE_SEND_JOB_KEY,
};
pub use classify::{classify_sends, SendClassification};
pub use eligibility::{is_eligible_for_sending, partition_eligible};
pub use transport::{
    AdminDelete, GroupTransport, OutgoingDataMessage, ScriptedTransport, SendResult, SendStatus,
    TransportError,
};
