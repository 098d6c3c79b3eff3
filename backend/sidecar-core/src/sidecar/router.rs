//! Sequential handling of listener and KMS events.
//!
//! Everything that touches the sequence counter, the batch tracker or the
//! keys runs on this one task. Batch submission is the only thing spawned,
//! so a slow KMS never holds up ingestion.

use crate::domain::{BatchService, BatchTracker, EventService};
use crate::error::kms::KmsError;
use crate::health::{HealthCheck, SidecarStatus};
use crate::kms::{
    HealthCheckRequest, InquiryRequest, KmsEvent, KmsEvents, KmsSession, RpcError, SessionState,
};
use crate::listener::{EventListener, ListenerEvent, ListenerEvents};

use models::{EventId, KmsKeys};

use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, error, info, warn};
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc;

const HEALTH_CHECK_PING: &str = "ping";
const INVALID_PARAMS: i64 = -32602;

pub(crate) struct Router {
    pub(crate) id: String,
    pub(crate) service_name: String,
    pub(crate) version: String,
    pub(crate) start_time: SystemTime,
    pub(crate) sequence: u64,
    pub(crate) keys: KmsKeys,
    pub(crate) session: KmsSession,
    pub(crate) listener: Arc<EventListener>,
    pub(crate) tracker: BatchTracker,
    pub(crate) events: EventService,
    pub(crate) batches: BatchService,
}

impl Router {
    pub(crate) async fn run(
        mut self,
        mut listener_events: ListenerEvents,
        mut kms_events: KmsEvents,
        mut shutdown: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(()) = shutdown.recv() => break,
                Some(event) = kms_events.recv() => self.on_kms_event(event).await,
                Some(event) = listener_events.recv() => self.on_listener_event(event),
                else => break,
            }
        }

        self.listener.close().await;
        self.session.close().await;
        info!("Sidecar {} stopped", self.id);
    }

    fn on_listener_event(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Message(message) => self.on_message(&message),
            ListenerEvent::Disconnect {
                connection_id,
                addr,
            } => debug!("Service connection {connection_id} from {addr} is gone"),
            ListenerEvent::Close => debug!("Event listener closed"),
        }
    }

    fn on_message(&mut self, message: &str) {
        info!("Received message {message}");
        self.sequence += 1;

        let event = match self
            .events
            .create(&self.id, self.sequence, message, &self.keys.row_key)
        {
            Ok(event) => event,
            Err(e) => {
                error!("Failed to record event with sequence {}: {e}", self.sequence);
                return;
            }
        };

        info!(
            "Created event {} with sequence {}",
            event.event_id, event.sequence
        );

        if let Some(event_ids) = self.tracker.event_created(event.event_id) {
            self.on_batch_ready(&event_ids);
        }
    }

    fn on_batch_ready(&self, event_ids: &[EventId]) {
        let batch = match self
            .batches
            .create(&self.id, event_ids, &self.keys.batch_key)
        {
            Ok(batch) => batch,
            Err(e) => {
                error!("Failed to create batch of {} events: {e}", event_ids.len());
                return;
            }
        };

        info!(
            "Created batch {} of {} events",
            batch.batch_external_id,
            batch.event_ids.len()
        );

        let session = self.session.clone();
        TokioSpawn(async move {
            match session.send_batch(&batch).await {
                Ok(result) => info!(
                    "Sent batch {} to KMS, result {result}",
                    batch.batch_external_id
                ),
                Err(e) => error!("Failed to send batch {} to KMS: {e}", batch.batch_external_id),
            }
        });
    }

    async fn on_kms_event(&mut self, event: KmsEvent) {
        match event {
            KmsEvent::HealthCheck(request) => self.on_health_check(&request),
            KmsEvent::Inquiry(request) => self.on_inquiry(&request),
            KmsEvent::Reconnected { epoch } => self.on_reconnected(epoch).await,
            KmsEvent::Disconnected {
                epoch,
                code,
                reason,
            } => warn!("KMS connection (epoch {epoch}) closed: {code:?} {reason}"),
            KmsEvent::TransportError { epoch, message } => {
                error!("KMS transport error (epoch {epoch}): {message}")
            }
        }
    }

    fn on_health_check(&self, request: &HealthCheckRequest) {
        info!(
            "Received KMS health check request {} with level {}",
            request.id, request.level
        );
        if request.level != HEALTH_CHECK_PING {
            debug!("Ignoring health check level {}", request.level);
            return;
        }

        let snapshot = HealthCheck::ping(&self.status());
        let outcome = serde_json::to_value(&snapshot)
            .map_err(KmsError::from)
            .and_then(|result| self.session.respond(&request.id, result));
        if let Err(e) = outcome {
            error!("Failed to answer health check {}: {e}", request.id);
        }
    }

    fn on_inquiry(&self, request: &InquiryRequest) {
        info!(
            "Received KMS inquiry {} for {} to {}",
            request.inquiry, request.start_time, request.end_time
        );

        let window = humantime::parse_rfc3339_weak(&request.start_time)
            .and_then(|start| Ok((start, humantime::parse_rfc3339_weak(&request.end_time)?)));
        let (start, end) = match window {
            Ok(window) => window,
            Err(e) => {
                warn!("Rejecting inquiry {} with bad time window: {e}", request.inquiry);
                let error = RpcError::new(INVALID_PARAMS, format!("Invalid time window: {e}"));
                if let Err(e) = self.session.respond_error(&request.id, &error) {
                    error!("Failed to reject inquiry {}: {e}", request.inquiry);
                }
                return;
            }
        };

        let outcome = match self.batches.find_for_timespan(start, end) {
            Ok(batches) => {
                info!("Inquiry {} matched {} batches", request.inquiry, batches.len());
                self.session.respond_to_inquiry(request, &batches)
            }
            Err(e) => {
                error!("Failed to look up batches for inquiry {}: {e}", request.inquiry);
                self.session
                    .respond_error(&request.id, &RpcError::new("InternalError", e.to_string()))
            }
        };
        if let Err(e) = outcome {
            error!("Failed to answer inquiry {}: {e}", request.inquiry);
        }
    }

    async fn on_reconnected(&mut self, epoch: u64) {
        info!("KMS reconnected (epoch {epoch}), registering again");
        self.listener.pause();

        match self.session.register(&self.id, &self.service_name).await {
            Ok(keys) => {
                self.keys = keys;
                info!("Re-registered sidecar {} with KMS", self.id);
            }
            Err(e) => error!("Re-registration after reconnect failed: {e}"),
        }

        self.listener.restart();
    }

    fn status(&self) -> SidecarStatus {
        SidecarStatus {
            id: self.id.clone(),
            service_name: self.service_name.clone(),
            version: self.version.clone(),
            start_time: self.start_time,
            sequence: self.sequence,
            operational: self.session.state() == SessionState::Operational,
        }
    }
}
