use serde::{Deserialize, Serialize};

use courier_core::{GroupMasterKey, ServiceId, ThreadId};

/// Group context attached to messages sent in a V2 group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupContextV2 {
    pub master_key: GroupMasterKey,
    /// Group revision the sender was on.
    pub revision: u32,
}

/// A decrypted incoming data message, as seen by the processing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingDataMessage {
    pub sender: ServiceId,
    /// Thread the message was inserted into.
    pub thread_id: ThreadId,
    pub sent_timestamp: i64,
    pub body: Option<String>,
    pub group_v2: Option<GroupContextV2>,
}

impl IncomingDataMessage {
    pub fn new(sender: ServiceId, thread_id: ThreadId, sent_timestamp: i64) -> Self {
        Self {
            sender,
            thread_id,
            sent_timestamp,
            body: None,
            group_v2: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn in_group(mut self, master_key: GroupMasterKey, revision: u32) -> Self {
        self.group_v2 = Some(GroupContextV2 {
            master_key,
            revision,
        });
        self
    }

    pub fn has_group_context(&self) -> bool {
        self.group_v2.is_some()
    }
}
