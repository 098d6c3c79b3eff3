//! The single control connection to the KMS.
//!
//! # Connection epochs
//!
//! Every successful connect creates a [`ConnectionEpoch`] owning the outbound
//! queue, the reader and writer tasks and a fresh [`KeepAlive`]. Teardown only
//! acts when the epoch that ended is still the current one, so late callbacks
//! from an older transport never touch a newer one.
//!
//! # Inbound traffic
//!
//! Text frames are JSON-RPC envelopes. Responses settle entries in the
//! [`PendingRequests`] table; KMS-initiated requests become [`KmsEvent`]s.
//! Anything malformed or unknown is logged and dropped. Ping frames are
//! answered with a pong echo by the WebSocket layer itself; pong frames are
//! logged with the round trip computed from their timestamp.

use crate::crypto::{asymmetric, symmetric};
use crate::error::kms::{KmsError, RegistrationFailure};
use crate::kms::envelope::{self, Inbound, RpcError};
use crate::kms::events::{
    HealthCheckParams, HealthCheckRequest, InquiryParams, InquiryRequest, KmsEvent, KmsEvents,
};
use crate::kms::keep_alive::KeepAlive;
use crate::kms::pending::PendingRequests;
use crate::kms::retry::RetryPolicy;
use crate::kms::settings::KmsSettings;
use crate::kms::state::{RegistrationStep, SessionState};

use common::ErrorLocation;
use models::{Batch, KmsKeys};

use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, SystemTime};

use backoff::backoff::{Backoff, Constant};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::spawn as TokioSpawn;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type KmsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// One live transport and everything scoped to it.
struct ConnectionEpoch {
    id: u64,
    outbound: mpsc::UnboundedSender<Message>,
    keep_alive: KeepAlive,
    writer: JoinHandle<()>,
    reader: Option<JoinHandle<()>>,
}

struct SessionInner {
    settings: KmsSettings,
    retry_policy: RetryPolicy,
    state: RwLock<SessionState>,
    epoch: Mutex<Option<ConnectionEpoch>>,
    epoch_counter: AtomicU64,
    pending: PendingRequests,
    events: mpsc::UnboundedSender<KmsEvent>,
    closing: AtomicBool,
    connect_lock: tokio::sync::Mutex<()>,
}

/// Handle to the KMS session. Clones share the same connection.
#[derive(Clone)]
pub struct KmsSession {
    inner: Arc<SessionInner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResult {
    #[serde(default)]
    id: Option<String>,
    row_key: String,
    batch_key: String,
    challenge: String,
}

#[derive(Debug, Deserialize)]
struct ChallengeResult {
    status: String,
}

impl KmsSession {
    pub fn new(settings: KmsSettings) -> (Self, KmsEvents) {
        Self::with_retry_policy(settings, RetryPolicy::default())
    }

    pub fn with_retry_policy(settings: KmsSettings, retry_policy: RetryPolicy) -> (Self, KmsEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(SessionInner {
                pending: PendingRequests::new(settings.request_timeout),
                settings,
                retry_policy,
                state: RwLock::new(SessionState::Disconnected),
                epoch: Mutex::new(None),
                epoch_counter: AtomicU64::new(0),
                events,
                closing: AtomicBool::new(false),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        };
        (session, receiver)
    }

    pub fn settings(&self) -> &KmsSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().has_transport()
    }

    /// Open the transport, retrying refused connections every `reconnect_interval`.
    ///
    /// Succeeds immediately if a transport is already open. Each attempt is
    /// bounded by `connect_timeout`; an attempt that times out is dropped
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`KmsError::ConnectTimeout`] if an attempt does not finish in time
    /// - [`KmsError::Transport`] for errors the retry policy treats as fatal
    /// - [`KmsError::NotConnected`] if the session is closed while retrying
    pub async fn connect(&self) -> Result<(), KmsError> {
        let _attempt = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        self.inner.closing.store(false, Ordering::SeqCst);
        let settings = &self.inner.settings;
        let mut backoff = Constant::new(settings.reconnect_interval);

        loop {
            self.inner.set_state(SessionState::Connecting);
            info!("Connecting to KMS at {}", settings.url);

            match timeout(settings.connect_timeout, connect_async(settings.url.as_str())).await {
                Ok(Ok((stream, _response))) => {
                    let epoch = self.inner.open_epoch(stream);
                    info!("Connected to KMS at {} (epoch {epoch})", settings.url);
                    return Ok(());
                }
                Ok(Err(e)) if self.inner.retry_policy.is_retryable(&e) => {
                    let delay = backoff.next_backoff().unwrap_or(settings.reconnect_interval);
                    warn!(
                        "Error connecting to KMS, attempting to connect after sleeping {}ms: {e}",
                        delay.as_millis()
                    );
                    sleep(delay).await;

                    if self.inner.closing.load(Ordering::SeqCst) {
                        self.inner.set_state(SessionState::Disconnected);
                        return Err(KmsError::NotConnected {
                            message: String::from("Session closed while connecting"),
                            location: ErrorLocation::from(Location::caller()),
                        });
                    }
                }
                Ok(Err(e)) => {
                    self.inner.set_state(SessionState::ConnectFailed);
                    error!("Error connecting to KMS at {}: {e}", settings.url);
                    return Err(KmsError::Transport {
                        message: e.to_string(),
                        retryable: false,
                        location: ErrorLocation::from(Location::caller()),
                    });
                }
                Err(_elapsed) => {
                    self.inner.set_state(SessionState::ConnectFailed);
                    let timeout_ms =
                        u64::try_from(settings.connect_timeout.as_millis()).unwrap_or(u64::MAX);
                    error!("Unable to connect to KMS within {timeout_ms}ms");
                    return Err(KmsError::ConnectTimeout {
                        timeout_ms,
                        location: ErrorLocation::from(Location::caller()),
                    });
                }
            }
        }
    }

    /// Run the register/challenge handshake and return the issued keys.
    ///
    /// The challenge is signed with the row key (symmetric) and the batch key
    /// (asymmetric); the keys themselves never go back over the wire.
    ///
    /// # Errors
    ///
    /// - [`KmsError::NotConnected`] unless the session is connected or operational
    /// - [`KmsError::Registration`] for rejections, malformed results, a foreign
    ///   sidecar id or a non-OK challenge status
    /// - [`KmsError::RequestTimeout`] if either step goes unanswered
    pub async fn register(&self, sidecar_id: &str, service_name: &str) -> Result<KmsKeys, KmsError> {
        match self.state() {
            SessionState::Connected | SessionState::Operational => {}
            state => {
                return Err(KmsError::NotConnected {
                    message: format!("You must connect before registering (state {state})"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        }

        self.inner.set_state(SessionState::Registering(
            RegistrationStep::AwaitingRegisterResponse,
        ));

        let outcome = self.run_registration(sidecar_id, service_name).await;
        let next = match &outcome {
            Ok(_) => SessionState::Operational,
            Err(_) => SessionState::RegistrationFailed,
        };
        self.inner
            .set_state_if(|state| matches!(state, SessionState::Registering(_)), next);

        match &outcome {
            Ok(_) => info!("Registered with KMS as sidecar {sidecar_id}"),
            Err(e) => error!("KMS registration failed for sidecar {sidecar_id}: {e}"),
        }
        outcome
    }

    async fn run_registration(&self, sidecar_id: &str, service_name: &str) -> Result<KmsKeys, KmsError> {
        let step = RegistrationStep::AwaitingRegisterResponse;
        let result = self
            .request_with_id(
                Some(format!("register-{sidecar_id}")),
                "register",
                json!({ "id": sidecar_id, "serviceName": service_name }),
            )
            .await
            .map_err(|e| rejected_at(step, e))?;

        let registered: RegisterResult = serde_json::from_value(result).map_err(|e| {
            registration_error(RegistrationFailure::MalformedResult {
                step,
                message: e.to_string(),
            })
        })?;

        if let Some(actual) = registered.id.as_deref().filter(|id| *id != sidecar_id) {
            return Err(registration_error(RegistrationFailure::UnexpectedSidecar {
                expected: sidecar_id.to_string(),
                actual: actual.to_string(),
            }));
        }

        let row_signature = symmetric::sign(&registered.challenge, &registered.row_key)
            .map_err(|e| registration_error(RegistrationFailure::Signing { message: e.to_string() }))?;
        let batch_signature = asymmetric::sign(&registered.challenge, &registered.batch_key)
            .map_err(|e| registration_error(RegistrationFailure::Signing { message: e.to_string() }))?;

        let step = RegistrationStep::AwaitingChallengeResponse;
        self.inner.set_state(SessionState::Registering(step));
        let result = self
            .request(
                "challenge",
                json!({ "rowSignature": row_signature, "batchSignature": batch_signature }),
            )
            .await
            .map_err(|e| rejected_at(step, e))?;

        let challenge: ChallengeResult = serde_json::from_value(result).map_err(|e| {
            registration_error(RegistrationFailure::MalformedResult {
                step,
                message: e.to_string(),
            })
        })?;

        if !challenge.status.eq_ignore_ascii_case("OK") {
            return Err(registration_error(RegistrationFailure::ChallengeStatus {
                status: challenge.status,
            }));
        }

        Ok(KmsKeys::new(registered.batch_key, registered.row_key))
    }

    /// Send a request and wait for its result.
    ///
    /// # Errors
    ///
    /// - [`KmsError::NotConnected`] without an open transport
    /// - [`KmsError::Response`] if the KMS answers with an error envelope
    /// - [`KmsError::RequestTimeout`] after `request_timeout` without an answer
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, KmsError> {
        self.request_with_id(None, method, params).await
    }

    async fn request_with_id(
        &self,
        id: Option<String>,
        method: &str,
        params: Value,
    ) -> Result<Value, KmsError> {
        if !self.is_connected() {
            return Err(KmsError::NotConnected {
                message: format!("Cannot send {method} request without a KMS connection"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let pending = self.inner.pending.start(id, |id| {
            self.inner
                .send_json(&envelope::request(id, method, params))
        })?;
        debug!("Sent KMS request {} ({method})", pending.id());

        pending.response().await
    }

    /// Reply to a KMS request with a result.
    pub fn respond(&self, request_id: &Value, result: Value) -> Result<(), KmsError> {
        self.inner.send_json(&envelope::result(request_id, result))
    }

    /// Reply to a KMS request with an error.
    pub fn respond_error(&self, request_id: &Value, error: &RpcError) -> Result<(), KmsError> {
        self.inner.send_json(&envelope::error(request_id, error))
    }

    /// Send a notification (no id, no response expected).
    pub fn notify(&self, method: &str, params: Value) -> Result<(), KmsError> {
        self.inner.send_json(&envelope::notification(method, params))
    }

    /// Answer an inquiry with one `inquiry-response` per batch.
    ///
    /// Items are numbered from 1 and carry the total count. With no batches a
    /// single `{inquiry, total: 0, item: 0}` notification is sent.
    pub fn respond_to_inquiry(&self, request: &InquiryRequest, batches: &[Batch]) -> Result<(), KmsError> {
        if batches.is_empty() {
            return self.notify(
                "inquiry-response",
                json!({ "inquiry": request.inquiry, "total": 0, "item": 0 }),
            );
        }

        let total = batches.len();
        for (index, batch) in batches.iter().enumerate() {
            self.notify(
                "inquiry-response",
                json!({
                    "inquiry": request.inquiry,
                    "id": batch.batch_external_id,
                    "body": batch.data,
                    "total": total,
                    "item": index + 1,
                }),
            )?;
        }
        Ok(())
    }

    /// Submit a signed batch and wait for the KMS to accept it.
    pub async fn send_batch(&self, batch: &Batch) -> Result<Value, KmsError> {
        self.request(
            "batch",
            json!({ "id": batch.batch_external_id, "signature": batch.signature }),
        )
        .await
    }

    /// Close the transport without reconnecting. Closing twice is a no-op.
    pub async fn close(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);

        let closing = {
            let mut guard = self.inner.lock_epoch();
            guard.as_mut().map(|epoch| {
                if epoch.outbound.send(Message::Close(None)).is_err() {
                    debug!("KMS writer already gone for epoch {}", epoch.id);
                }
                (epoch.id, epoch.reader.take())
            })
        };

        let Some((epoch_id, reader)) = closing else {
            debug!("KMS session close requested but no transport is open");
            return;
        };

        info!("Closing KMS connection (epoch {epoch_id})");
        if let Some(mut reader) = reader {
            if timeout(CLOSE_GRACE_PERIOD, &mut reader).await.is_err() {
                warn!("KMS did not acknowledge close within {}ms", CLOSE_GRACE_PERIOD.as_millis());
                reader.abort();
                self.inner.end_epoch(epoch_id, None, None);
            }
        }
    }
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!("KMS session {} -> {next}", *state);
            *state = next;
        }
    }

    fn set_state_if(&self, condition: impl Fn(&SessionState) -> bool, next: SessionState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if condition(&state) {
            debug!("KMS session {} -> {next}", *state);
            *state = next;
        }
    }

    fn lock_epoch(&self) -> std::sync::MutexGuard<'_, Option<ConnectionEpoch>> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_epoch(&self) -> Option<u64> {
        self.lock_epoch().as_ref().map(|epoch| epoch.id)
    }

    #[track_caller]
    fn send_json(&self, value: &Value) -> Result<(), KmsError> {
        let text = value.to_string();
        let guard = self.lock_epoch();
        let epoch = guard.as_ref().ok_or_else(|| KmsError::NotConnected {
            message: String::from("No KMS transport is open"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        trace!("Sending to KMS: {text}");
        epoch
            .outbound
            .send(Message::text(text))
            .map_err(|e| KmsError::Send {
                message: format!("KMS writer is gone: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })
    }

    fn emit(&self, event: KmsEvent) {
        if self.events.send(event).is_err() {
            debug!("KMS event dropped, receiver is gone");
        }
    }

    /// Install a new epoch for `stream` and mark the session connected.
    ///
    /// The reader and writer only start once the epoch is stored, so an
    /// immediate close from the KMS always finds the epoch it belongs to.
    fn open_epoch(self: &Arc<Self>, stream: KmsStream) -> u64 {
        let id = self.epoch_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut sink, mut source) = stream.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();
        let (start, started) = oneshot::channel::<()>();

        let session: Weak<SessionInner> = Arc::downgrade(self);
        let writer = TokioSpawn(async move {
            while let Some(message) = queue.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!("KMS writer for epoch {id} stopping: {e}");
                    if let Some(inner) = session.upgrade() {
                        inner.end_epoch(id, None, Some(e));
                    }
                    return;
                }
                if closing {
                    return;
                }
            }
        });

        let session: Weak<SessionInner> = Arc::downgrade(self);
        let reader = TokioSpawn(async move {
            if started.await.is_err() {
                return;
            }
            let mut close_frame = None;
            let mut failure = None;

            while let Some(frame) = source.next().await {
                let Some(inner) = session.upgrade() else {
                    return;
                };
                match frame {
                    Ok(Message::Text(text)) => inner.dispatch(text.as_str()),
                    Ok(Message::Binary(data)) => {
                        warn!("Dropping binary frame of {} bytes from KMS", data.len())
                    }
                    Ok(Message::Ping(_)) => trace!("Received ping from KMS"),
                    Ok(Message::Pong(data)) => log_pong(&data),
                    Ok(Message::Close(frame)) => close_frame = frame,
                    Ok(Message::Frame(_)) => {}
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            if let Some(inner) = session.upgrade() {
                inner.end_epoch(id, close_frame, failure);
            }
        });

        let keep_alive = KeepAlive::new(self.settings.ping_interval, outbound.clone());

        {
            let mut epoch = self.lock_epoch();
            *epoch = Some(ConnectionEpoch {
                id,
                outbound,
                keep_alive,
                writer,
                reader: Some(reader),
            });
            self.set_state(SessionState::Connected);
            if let Some(epoch) = epoch.as_ref() {
                epoch.keep_alive.start();
            }
        }

        if start.send(()).is_err() {
            warn!("KMS reader for epoch {id} exited before it started");
        }
        id
    }

    fn end_epoch(self: &Arc<Self>, id: u64, close_frame: Option<CloseFrame>, failure: Option<WsError>) {
        let ended = {
            let mut guard = self.lock_epoch();
            match guard.as_ref() {
                Some(epoch) if epoch.id == id => guard.take(),
                _ => None,
            }
        };

        let Some(ended) = ended else {
            debug!("Ignoring end of superseded KMS connection epoch {id}");
            return;
        };

        info!("Cleaning up KMS connection (epoch {id})");
        ended.keep_alive.stop();
        ended.writer.abort();
        if let Some(reader) = ended.reader {
            reader.abort();
        }

        let previous = self.state();
        self.set_state(SessionState::Disconnected);

        if let Some(e) = failure {
            error!("Error on KMS websocket connection: {e}");
            self.emit(KmsEvent::TransportError {
                epoch: id,
                message: e.to_string(),
            });
        }

        let (code, reason) = match close_frame {
            Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
            None => (None, String::new()),
        };
        info!(
            "KMS websocket connection closed: {} - {reason}",
            code.map_or_else(|| String::from("none"), |c| c.to_string())
        );
        self.emit(KmsEvent::Disconnected {
            epoch: id,
            code,
            reason,
        });

        if self.settings.auto_reconnect
            && !self.closing.load(Ordering::SeqCst)
            && previous.has_transport()
        {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let session = KmsSession {
            inner: Arc::clone(self),
        };
        let delay = self.settings.reconnect_interval;
        info!("Reconnecting to KMS in {}ms", delay.as_millis());

        TokioSpawn(async move {
            sleep(delay).await;
            if session.inner.closing.load(Ordering::SeqCst) {
                debug!("Reconnect cancelled, session is closing");
                return;
            }

            match session.connect().await {
                Ok(()) => match session.inner.current_epoch() {
                    Some(epoch) => {
                        info!("Reconnected to KMS (epoch {epoch})");
                        session.inner.emit(KmsEvent::Reconnected { epoch });
                    }
                    None => warn!("Reconnected to KMS but the transport closed again"),
                },
                Err(e) => {
                    error!("Reconnecting to KMS failed: {e}");
                    session.inner.emit(KmsEvent::TransportError {
                        epoch: 0,
                        message: e.to_string(),
                    });
                }
            }
        });
    }

    fn dispatch(&self, text: &str) {
        match envelope::parse(text) {
            Ok(Inbound::Request { id, method, params }) => self.route_request(id, &method, params, text),
            Ok(Inbound::Response { id, outcome }) => {
                let outcome = outcome.map_err(RpcError::into_kms_error);
                if !self.pending.complete(&id, outcome) {
                    warn!("Received response for unknown request {id}: {text}");
                }
            }
            Err(e) => warn!("Dropping malformed KMS message: {e} (raw: {text})"),
        }
    }

    fn route_request(&self, id: Value, method: &str, params: Value, raw: &str) {
        match method {
            "healthcheck" => match serde_json::from_value::<HealthCheckParams>(params) {
                Ok(params) => self.emit(KmsEvent::HealthCheck(HealthCheckRequest {
                    id,
                    level: params.level,
                })),
                Err(e) => warn!("Dropping healthcheck with bad params: {e} (raw: {raw})"),
            },
            "inquiry" => match serde_json::from_value::<InquiryParams>(params) {
                Ok(params) => self.emit(KmsEvent::Inquiry(InquiryRequest {
                    id,
                    inquiry: params.inquiry,
                    start_time: params.start_time,
                    end_time: params.end_time,
                })),
                Err(e) => warn!("Dropping inquiry with bad params: {e} (raw: {raw})"),
            },
            other => warn!("Dropping KMS request with unknown method {other}: {raw}"),
        }
    }
}

fn log_pong(data: &[u8]) {
    let sent = serde_json::from_slice::<Value>(data)
        .ok()
        .and_then(|v| v.get("timestamp").and_then(Value::as_str).map(str::to_owned))
        .and_then(|ts| humantime::parse_rfc3339_weak(&ts).ok());

    match sent.map(|sent| SystemTime::now().duration_since(sent).unwrap_or_default()) {
        Some(elapsed) => info!("Received pong, elapsed {}ms", elapsed.as_millis()),
        None => debug!("Received pong without a readable timestamp"),
    }
}

#[track_caller]
fn registration_error(reason: RegistrationFailure) -> KmsError {
    KmsError::Registration {
        reason,
        location: ErrorLocation::from(Location::caller()),
    }
}

/// Turn a KMS error envelope at `step` into a registration failure.
/// Timeouts and transport errors pass through unchanged.
fn rejected_at(step: RegistrationStep, error: KmsError) -> KmsError {
    match error {
        KmsError::Response { code, message, .. } => {
            registration_error(RegistrationFailure::Rejected {
                step,
                code,
                message,
            })
        }
        other => other,
    }
}
