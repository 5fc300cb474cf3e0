//! Which recipients a send may target.

use courier_core::{Recipient, RegisteredState};

/// A recipient can be sent to when it is an individual account with a stable
/// service identity that the service has not reported unregistered.
pub fn is_eligible_for_sending(recipient: &Recipient) -> bool {
    recipient.has_service_id()
        && !recipient.is_group()
        && recipient.registered != RegisteredState::NotRegistered
}

/// Split `recipients` into (eligible, ineligible), preserving order.
pub fn partition_eligible(recipients: Vec<Recipient>) -> (Vec<Recipient>, Vec<Recipient>) {
    recipients.into_iter().partition(is_eligible_for_sending)
}
