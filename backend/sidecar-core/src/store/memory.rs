use crate::error::store::StoreError;
use crate::store::{BatchStore, EventStore};

use common::ErrorLocation;
use models::{Batch, Event, EventId};

use std::collections::{HashMap, HashSet};
use std::panic::Location;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use log::trace;
use uuid::Uuid;

#[derive(Default)]
struct EventTable {
    rows: HashMap<EventId, Event>,
    sequences: HashSet<(String, u64)>,
}

/// In-process store backed by lock-guarded maps.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<EventTable>,
    batches: RwLock<HashMap<Uuid, Batch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> Result<usize, StoreError> {
        Ok(self.read_events()?.rows.len())
    }

    pub fn batch_count(&self) -> Result<usize, StoreError> {
        Ok(self.read_batches()?.len())
    }

    #[track_caller]
    fn read_events(&self) -> Result<RwLockReadGuard<'_, EventTable>, StoreError> {
        self.events.read().map_err(|_| poisoned("events"))
    }

    #[track_caller]
    fn write_events(&self) -> Result<RwLockWriteGuard<'_, EventTable>, StoreError> {
        self.events.write().map_err(|_| poisoned("events"))
    }

    #[track_caller]
    fn read_batches(&self) -> Result<RwLockReadGuard<'_, HashMap<Uuid, Batch>>, StoreError> {
        self.batches.read().map_err(|_| poisoned("batches"))
    }

    #[track_caller]
    fn write_batches(&self) -> Result<RwLockWriteGuard<'_, HashMap<Uuid, Batch>>, StoreError> {
        self.batches.write().map_err(|_| poisoned("batches"))
    }
}

#[track_caller]
fn poisoned(table: &str) -> StoreError {
    StoreError::Poisoned {
        message: format!("{table} table lock was poisoned"),
        location: ErrorLocation::from(Location::caller()),
    }
}

fn within(created: SystemTime, start: Option<SystemTime>, end: Option<SystemTime>) -> bool {
    start.is_none_or(|start| created >= start) && end.is_none_or(|end| created <= end)
}

impl EventStore for MemoryStore {
    fn insert_event(&self, event: Event) -> Result<(), StoreError> {
        let mut table = self.write_events()?;

        if table.rows.contains_key(&event.event_id) {
            return Err(StoreError::Duplicate {
                message: format!("event {} already exists", event.event_id),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let sequence_key = (event.sidecar_id.clone(), event.sequence);
        if table.sequences.contains(&sequence_key) {
            return Err(StoreError::Duplicate {
                message: format!(
                    "sequence {} already recorded for sidecar {}",
                    event.sequence, event.sidecar_id
                ),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        trace!("Storing event {} (sequence {})", event.event_id, event.sequence);
        table.sequences.insert(sequence_key);
        table.rows.insert(event.event_id, event);
        Ok(())
    }

    fn events_by_ids(&self, ids: &[EventId]) -> Result<Vec<Event>, StoreError> {
        let table = self.read_events()?;
        Ok(ids.iter().filter_map(|id| table.rows.get(id).cloned()).collect())
    }

    fn count_events(
        &self,
        sidecar_id: &str,
        start: Option<SystemTime>,
        end: Option<SystemTime>,
    ) -> Result<usize, StoreError> {
        let table = self.read_events()?;
        Ok(table
            .rows
            .values()
            .filter(|event| event.sidecar_id == sidecar_id && within(event.created, start, end))
            .count())
    }

    fn assign_batch(&self, event_ids: &[EventId], batch_id: Uuid) -> Result<(), StoreError> {
        let mut table = self.write_events()?;

        if let Some(missing) = event_ids.iter().find(|id| !table.rows.contains_key(id)) {
            return Err(StoreError::NotFound {
                message: format!("event {missing} does not exist"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        for id in event_ids {
            if let Some(event) = table.rows.get_mut(id) {
                event.batch_id = Some(batch_id);
            }
        }
        Ok(())
    }
}

impl BatchStore for MemoryStore {
    fn insert_batch(&self, batch: Batch) -> Result<(), StoreError> {
        let mut batches = self.write_batches()?;

        if batches.contains_key(&batch.batch_external_id) {
            return Err(StoreError::Duplicate {
                message: format!("batch {} already exists", batch.batch_external_id),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        trace!("Storing batch {}", batch.batch_external_id);
        batches.insert(batch.batch_external_id, batch);
        Ok(())
    }

    fn batches_between(&self, start: SystemTime, end: SystemTime) -> Result<Vec<Batch>, StoreError> {
        let batches = self.read_batches()?;
        let mut found: Vec<Batch> = batches
            .values()
            .filter(|batch| within(batch.created, Some(start), Some(end)))
            .cloned()
            .collect();
        found.sort_by_key(|batch| batch.created);
        Ok(found)
    }
}
