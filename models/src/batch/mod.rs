mod builder;

pub use builder::BatchBuilder;

use crate::ModelError;
use crate::event::{Event, EventId, SignableEvent};

use common::ErrorLocation;

use std::panic::Location;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A signed aggregation of previously unbatched events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub batch_external_id: Uuid,
    pub sidecar_id: String,
    /// JSON array of [`BatchRow`], exactly as signed.
    pub data: String,
    pub signature: String,
    pub created: SystemTime,
    pub event_ids: Vec<EventId>,
}

/// One entry of a batch payload: the signable row and its row signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchRow {
    pub row: SignableEvent,
    pub signature: String,
}

impl BatchRow {
    pub fn from_event(event: &Event) -> Self {
        Self {
            row: event.signable(),
            signature: event.signature.clone(),
        }
    }
}

impl Batch {
    /// Serialize the rows of `events` into the batch payload that gets signed.
    #[track_caller]
    pub fn build_data(events: &[Event]) -> Result<String, ModelError> {
        let rows: Vec<BatchRow> = events.iter().map(BatchRow::from_event).collect();

        serde_json::to_string(&rows).map_err(|e| ModelError::Serialization {
            message: format!("Failed to serialize batch rows: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })
    }
}
