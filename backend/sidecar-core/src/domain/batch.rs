use crate::crypto::asymmetric;
use crate::domain::event::EventService;
use crate::error::domain::DomainError;
use crate::store::BatchStore;

use common::{ErrorLocation, RedactedKey};
use models::{Batch, BatchBuilder, EventId};

use std::panic::Location;
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, warn};

#[derive(Clone)]
pub struct BatchService {
    store: Arc<dyn BatchStore>,
    events: EventService,
}

impl BatchService {
    pub fn new(store: Arc<dyn BatchStore>, events: EventService) -> Self {
        Self { store, events }
    }

    /// Sign the still-unbatched events among `event_ids` as one batch.
    ///
    /// Events already assigned elsewhere are left out. The batch data is the
    /// JSON array of `{row, signature}` and is signed with `batch_key`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::EmptyBatch`] if none of the ids is unbatched.
    pub fn create(
        &self,
        sidecar_id: &str,
        event_ids: &[EventId],
        batch_key: &RedactedKey,
    ) -> Result<Batch, DomainError> {
        let events = self.events.get_unbatched_events_by_ids(event_ids)?;
        if events.is_empty() {
            return Err(DomainError::EmptyBatch {
                message: format!("none of {} events is unbatched", event_ids.len()),
                location: ErrorLocation::from(Location::caller()),
            });
        }
        if events.len() < event_ids.len() {
            warn!(
                "Batching {} of {} requested events, the rest are missing or already batched",
                events.len(),
                event_ids.len()
            );
        }

        let data = Batch::build_data(&events)?;
        let signature = asymmetric::sign(&data, batch_key.expose())?;

        let batch = BatchBuilder::default()
            .with_sidecar_id(sidecar_id)
            .with_data(data)
            .with_signature(signature)
            .with_event_ids(events.iter().map(|event| event.event_id).collect())
            .build()?;

        self.store.insert_batch(batch.clone())?;
        self.events.assign_events_to_batch(&events, &batch)?;
        debug!("Persisted batch {} of {} events", batch.batch_external_id, events.len());
        Ok(batch)
    }

    pub fn find_for_timespan(&self, start: SystemTime, end: SystemTime) -> Result<Vec<Batch>, DomainError> {
        Ok(self.store.batches_between(start, end)?)
    }
}
