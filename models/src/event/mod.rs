mod builder;

pub use builder::EventBuilder;

use crate::timestamp::to_iso8601;

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EventId = Uuid;

/// A service message that has been sequenced, signed and recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_id: EventId,
    pub sidecar_id: String,
    pub sequence: u64,
    pub message: String,
    pub signature: String,
    pub created: SystemTime,
    /// External id of the batch this event was assigned to, if any.
    pub batch_id: Option<Uuid>,
}

impl Event {
    pub fn signable(&self) -> SignableEvent {
        SignableEvent::new(&self.sidecar_id, self.sequence, &self.message, self.created)
    }

    pub fn is_batched(&self) -> bool {
        self.batch_id.is_some()
    }
}

/// The exact shape that gets serialized and signed for a row.
///
/// Field order is part of the signature: `keyId`, `sequence`, `message`, `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignableEvent {
    pub key_id: String,
    pub sequence: u64,
    pub message: String,
    pub timestamp: String,
}

impl SignableEvent {
    pub fn new(sidecar_id: &str, sequence: u64, message: &str, created: SystemTime) -> Self {
        Self {
            key_id: sidecar_id.to_string(),
            sequence,
            message: message.to_string(),
            timestamp: to_iso8601(created),
        }
    }
}
