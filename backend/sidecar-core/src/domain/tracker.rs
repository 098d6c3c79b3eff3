use models::EventId;

use log::trace;

/// Collects event ids until enough exist for a batch.
#[derive(Debug)]
pub struct BatchTracker {
    batch_size: usize,
    pending: Vec<EventId>,
}

impl BatchTracker {
    /// A `batch_size` of zero is treated as one.
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
        }
    }

    /// Record a new event. Returns the oldest `batch_size` ids once that many are waiting.
    pub fn event_created(&mut self, event_id: EventId) -> Option<Vec<EventId>> {
        self.pending.push(event_id);
        trace!("{} of {} events waiting for a batch", self.pending.len(), self.batch_size);

        if self.pending.len() >= self.batch_size {
            Some(self.pending.drain(..self.batch_size).collect())
        } else {
            None
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
