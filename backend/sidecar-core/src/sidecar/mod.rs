//! Sidecar orchestration.
//!
//! [`Sidecar::start`] connects and registers with the KMS, binds the event
//! listener and hands both event streams to a [`Router`](router::Router)
//! task. The returned [`SidecarHandle`] stops everything again.

mod handle;
mod router;

pub use handle::SidecarHandle;

use crate::config::SidecarConfig;
use crate::domain::{BatchService, BatchTracker, EventService};
use crate::error::sidecar::SidecarError;
use crate::kms::{KmsSession, KmsSettings};
use crate::listener::EventListener;
use crate::sidecar::router::Router;
use crate::store::{BatchStore, EventStore};

use std::sync::Arc;
use std::time::SystemTime;

use log::info;
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct Sidecar {
    id: String,
    config: SidecarConfig,
    events: EventService,
    batches: BatchService,
}

impl Sidecar {
    /// Create a sidecar with a fresh id, persisting into `store`.
    pub fn new<S>(config: SidecarConfig, store: Arc<S>) -> Self
    where
        S: EventStore + BatchStore + 'static,
    {
        let event_store: Arc<dyn EventStore> = store.clone();
        let batch_store: Arc<dyn BatchStore> = store;
        let events = EventService::new(event_store);
        let batches = BatchService::new(batch_store, events.clone());

        Self {
            id: Uuid::new_v4().to_string(),
            config,
            events,
            batches,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connect, register, listen, then route events until shut down.
    ///
    /// # Errors
    ///
    /// - [`SidecarError::Kms`] if the KMS cannot be reached or registration fails
    /// - [`SidecarError::Listener`] if the event port cannot be bound
    pub async fn start(self) -> Result<SidecarHandle, SidecarError> {
        let start_time = SystemTime::now();
        let (session, kms_events) = KmsSession::new(KmsSettings::from(&self.config.kms));

        session.connect().await?;
        let keys = match session.register(&self.id, &self.config.service_name).await {
            Ok(keys) => keys,
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };

        let (listener, listener_events) = EventListener::new(self.config.listener.max_frame_size);
        let local_addr = match listener
            .listen(self.config.listener.port, Some(&self.config.listener.address))
            .await
        {
            Ok(addr) => addr,
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };

        info!(
            "Sidecar {} for service {} listening on {local_addr}",
            self.id, self.config.service_name
        );

        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let router = Router {
            id: self.id.clone(),
            service_name: self.config.service_name.clone(),
            version: self.config.version.clone(),
            start_time,
            sequence: 0,
            keys,
            session,
            listener: Arc::new(listener),
            tracker: BatchTracker::new(self.config.batch_size),
            events: self.events,
            batches: self.batches,
        };
        let task = TokioSpawn(router.run(listener_events, kms_events, shutdown_rx));

        Ok(SidecarHandle::new(self.id, local_addr, shutdown, task))
    }
}
