use crate::ModelError;
use crate::batch::Batch;
use crate::event::EventId;

use common::ErrorLocation;

use std::panic::Location;
use std::time::SystemTime;

use uuid::Uuid;

/// Builder for creating validated Batch instances.
#[derive(Debug, Default)]
pub struct BatchBuilder {
    batch_external_id: Option<Uuid>,
    sidecar_id: Option<String>,
    data: Option<String>,
    signature: Option<String>,
    created: Option<SystemTime>,
    event_ids: Vec<EventId>,
}

impl BatchBuilder {
    pub fn with_batch_external_id(mut self, id: Uuid) -> Self {
        self.batch_external_id = Some(id);
        self
    }

    pub fn with_sidecar_id(mut self, sidecar_id: impl Into<String>) -> Self {
        self.sidecar_id = Some(sidecar_id.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
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

    pub fn with_event_ids(mut self, event_ids: Vec<EventId>) -> Self {
        self.event_ids = event_ids;
        self
    }

    /// Build the Batch with validation.
    #[track_caller]
    pub fn build(self) -> Result<Batch, ModelError> {
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

        let data = self.data.ok_or_else(|| ModelError::Validation {
            message: String::from("Batch data is required"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let signature = self.signature.ok_or_else(|| ModelError::Validation {
            message: String::from("Batch signature is required"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        if signature.is_empty() {
            return Err(ModelError::Validation {
                message: String::from("Batch signature cannot be empty"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.event_ids.is_empty() {
            return Err(ModelError::Validation {
                message: String::from("A batch must contain at least one event"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        Ok(Batch {
            batch_external_id: self.batch_external_id.unwrap_or_else(Uuid::new_v4),
            sidecar_id,
            data,
            signature,
            created: self.created.unwrap_or_else(SystemTime::now),
            event_ids: self.event_ids,
        })
    }
}
