//! Correlation table for outbound requests awaiting a response.
//!
//! Each entry is settled exactly once: either [`PendingRequests::complete`]
//! finds it, or its timer fires and removes it with a timeout error. Both
//! paths go through the same map removal, so whichever runs second sees
//! nothing and does nothing.

use crate::error::kms::KmsError;

use common::ErrorLocation;

use std::collections::HashMap;
use std::panic::Location;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{trace, warn};
use serde_json::Value;
use tokio::spawn as TokioSpawn;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

type Outcome = Result<Value, KmsError>;

struct PendingEntry {
    created_at: Instant,
    responder: oneshot::Sender<Outcome>,
    timer: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<String, PendingEntry>>>;

/// In-flight requests keyed by correlation id.
pub struct PendingRequests {
    timeout: Duration,
    entries: Entries,
}

/// Receiving side of one pending request.
#[derive(Debug)]
pub struct PendingRequest {
    id: String,
    receiver: oneshot::Receiver<Outcome>,
}

impl PendingRequest {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the response, the timeout, or the table going away.
    pub async fn response(self) -> Outcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(KmsError::NotConnected {
                message: format!("Request {} was abandoned before a response arrived", self.id),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }
}

impl PendingRequests {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a request and hand its id to `send` for transmission.
    ///
    /// When `id` is `None` a UUID is generated. The entry and its timer exist
    /// before `send` runs, so a response can never outrun the registration.
    /// If `send` fails the entry is withdrawn and the error returned.
    ///
    /// # Errors
    ///
    /// - [`KmsError::DuplicateRequestId`] if `id` is already outstanding
    /// - whatever `send` returns
    #[track_caller]
    pub fn start<F>(&self, id: Option<String>, send: F) -> Result<PendingRequest, KmsError>
    where
        F: FnOnce(&str) -> Result<(), KmsError>,
    {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let (responder, receiver) = oneshot::channel();

        {
            let mut entries = self.lock();
            if entries.contains_key(&id) {
                return Err(KmsError::DuplicateRequestId {
                    id,
                    location: ErrorLocation::from(Location::caller()),
                });
            }

            let timer = TokioSpawn(expire(Arc::clone(&self.entries), id.clone(), self.timeout));
            entries.insert(
                id.clone(),
                PendingEntry {
                    created_at: Instant::now(),
                    responder,
                    timer,
                },
            );
        }

        if let Err(e) = send(&id) {
            if let Some(entry) = self.lock().remove(&id) {
                entry.timer.abort();
            }
            return Err(e);
        }

        Ok(PendingRequest { id, receiver })
    }

    /// Settle the request `id` with `outcome`.
    ///
    /// Returns `false` if no such request is pending, e.g. it already timed out.
    pub fn complete(&self, id: &str, outcome: Outcome) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            return false;
        };

        entry.timer.abort();
        trace!(
            "Request {id} completed after {}ms",
            entry.created_at.elapsed().as_millis()
        );
        if entry.responder.send(outcome).is_err() {
            warn!("Response for request {id} arrived but nobody is waiting for it");
        }
        true
    }

    pub fn exists(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PendingRequests {
    fn drop(&mut self) {
        for (_, entry) in self.lock().drain() {
            entry.timer.abort();
        }
    }
}

async fn expire(entries: Entries, id: String, timeout: Duration) {
    sleep(timeout).await;

    let entry = entries
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);

    if let Some(entry) = entry {
        warn!("Request {id} timed out after {}ms", timeout.as_millis());
        let _ = entry.responder.send(Err(KmsError::RequestTimeout {
            id: id.clone(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            location: ErrorLocation::from(Location::caller()),
        }));
    }
}
