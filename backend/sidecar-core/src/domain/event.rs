use crate::crypto::symmetric;
use crate::error::domain::DomainError;
use crate::store::EventStore;

use common::RedactedKey;
use models::{Batch, Event, EventBuilder, EventId, SignableEvent};

use std::sync::Arc;
use std::time::SystemTime;

use log::debug;

#[derive(Clone)]
pub struct EventService {
    store: Arc<dyn EventStore>,
}

impl EventService {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Sign `message` as event `sequence` of `sidecar_id` and persist it.
    ///
    /// The row signature covers the JSON of the signable form
    /// `{keyId, sequence, message, timestamp}`.
    pub fn create(
        &self,
        sidecar_id: &str,
        sequence: u64,
        message: &str,
        row_key: &RedactedKey,
    ) -> Result<Event, DomainError> {
        let created = SystemTime::now();
        let signable = SignableEvent::new(sidecar_id, sequence, message, created);
        let signature = symmetric::sign(&serde_json::to_string(&signable)?, row_key.expose())?;

        let event = EventBuilder::default()
            .with_sidecar_id(sidecar_id)
            .with_sequence(sequence)
            .with_message(message)
            .with_signature(signature)
            .with_created(created)
            .build()?;

        self.store.insert_event(event.clone())?;
        debug!("Persisted event {} with sequence {sequence}", event.event_id);
        Ok(event)
    }

    pub fn get_event_count_in_timespan(
        &self,
        sidecar_id: &str,
        start: Option<SystemTime>,
        end: Option<SystemTime>,
    ) -> Result<usize, DomainError> {
        Ok(self.store.count_events(sidecar_id, start, end)?)
    }

    /// The subset of `ids` that exist and are not yet in a batch, in `ids` order.
    pub fn get_unbatched_events_by_ids(&self, ids: &[EventId]) -> Result<Vec<Event>, DomainError> {
        Ok(self
            .store
            .events_by_ids(ids)?
            .into_iter()
            .filter(|event| !event.is_batched())
            .collect())
    }

    pub fn assign_events_to_batch(&self, events: &[Event], batch: &Batch) -> Result<(), DomainError> {
        let ids: Vec<EventId> = events.iter().map(|event| event.event_id).collect();
        self.store.assign_batch(&ids, batch.batch_external_id)?;
        Ok(())
    }
}
