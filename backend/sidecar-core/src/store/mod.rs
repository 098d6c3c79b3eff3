//! Persistence seam for events and batches.
//!
//! Services talk to storage only through [`EventStore`] and [`BatchStore`].
//! [`MemoryStore`] implements both in process.

mod memory;

pub use memory::MemoryStore;

use crate::error::store::StoreError;

use models::{Batch, Event, EventId};

use std::time::SystemTime;

use uuid::Uuid;

pub trait EventStore: Send + Sync {
    /// Persist a new event.
    ///
    /// Fails with [`StoreError::Duplicate`] if the event id or its
    /// `(sidecar_id, sequence)` pair is already stored.
    fn insert_event(&self, event: Event) -> Result<(), StoreError>;

    /// Events with the given ids, in the order of `ids`. Unknown ids are skipped.
    fn events_by_ids(&self, ids: &[EventId]) -> Result<Vec<Event>, StoreError>;

    /// Count events of `sidecar_id` created within the optional bounds (inclusive).
    fn count_events(
        &self,
        sidecar_id: &str,
        start: Option<SystemTime>,
        end: Option<SystemTime>,
    ) -> Result<usize, StoreError>;

    /// Mark events as belonging to `batch_id`.
    fn assign_batch(&self, event_ids: &[EventId], batch_id: Uuid) -> Result<(), StoreError>;
}

pub trait BatchStore: Send + Sync {
    /// Persist a new batch. `batch_external_id` must be unique.
    fn insert_batch(&self, batch: Batch) -> Result<(), StoreError>;

    /// Batches created within `[start, end]`, oldest first.
    fn batches_between(&self, start: SystemTime, end: SystemTime) -> Result<Vec<Batch>, StoreError>;
}
