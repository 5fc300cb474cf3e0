//! Turning per-recipient send results into retry bookkeeping.

use std::collections::HashMap;

use courier_core::RecipientId;

use crate::transport::{SendResult, SendStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendClassification {
    /// Delivered; never send to these again.
    pub completed: Vec<RecipientId>,
    /// Unknown to the service; mark durably and drop.
    pub unregistered: Vec<RecipientId>,
    /// Not delivered; keep for the next attempt.
    pub skipped: Vec<RecipientId>,
}

/// Classify every destination by its send result.
///
/// A destination without a result counts as skipped. Results for recipients
/// that were not destinations are ignored.
pub fn classify_sends(destinations: &[RecipientId], results: &[SendResult]) -> SendClassification {
    let by_recipient: HashMap<RecipientId, &SendStatus> =
        results.iter().map(|r| (r.recipient, &r.status)).collect();

    let mut classification = SendClassification::default();
    for &id in destinations {
        match by_recipient.get(&id) {
            Some(SendStatus::Delivered) => classification.completed.push(id),
            Some(SendStatus::Unregistered) => classification.unregistered.push(id),
            Some(SendStatus::Failed(_)) | None => classification.skipped.push(id),
        }
    }
    classification
}
