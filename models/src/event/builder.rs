use crate::ModelError;
use crate::event::{Event, EventId};

use common::ErrorLocation;

use std::panic::Location;
use std::time::SystemTime;

use uuid::Uuid;

/// Builder for creating validated Event instances.
///
/// A fresh event id is generated unless one is supplied; `created` defaults to now.
#[derive(Debug, Default)]
pub struct EventBuilder {
    event_id: Option<EventId>,
    sidecar_id: Option<String>,
    sequence: Option<u64>,
    message: Option<String>,
    signature: Option<String>,
    created: Option<SystemTime>,
}

impl EventBuilder {
    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn with_sidecar_id(mut self, sidecar_id: impl Into<String>) -> Self {
        self.sidecar_id = Some(sidecar_id.into());
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_created(mut self, created: SystemTime) -> Self {
        self.created = Some(created);
        self
    }

    /// Build the Event with validation.
    #[track_caller]
    pub fn build(self) -> Result<Event, ModelError> {
        let sidecar_id = self.sidecar_id.ok_or_else(|| ModelError::Validation {
            message: String::from("Sidecar id is required"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        if sidecar_id.is_empty() {
            return Err(ModelError::Validation {
                message: String::from("Sidecar id cannot be empty"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let sequence = self.sequence.ok_or_else(|| ModelError::Validation {
            message: String::from("Sequence is required"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        if sequence == 0 {
            return Err(ModelError::Validation {
                message: String::from("Sequence must start at 1"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let message = self.message.ok_or_else(|| ModelError::Validation {
            message: String::from("Message is required"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let signature = self.signature.ok_or_else(|| ModelError::Validation {
            message: String::from("Signature is required"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        if signature.is_empty() {
            return Err(ModelError::Validation {
                message: String::from("Signature cannot be empty"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        Ok(Event {
            event_id: self.event_id.unwrap_or_else(Uuid::new_v4),
            sidecar_id,
            sequence,
            message,
            signature,
            created: self.created.unwrap_or_else(SystemTime::now),
            batch_id: None,
        })
    }
}
