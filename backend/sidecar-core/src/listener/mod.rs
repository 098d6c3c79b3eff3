//! TCP listener for framed service events.
//!
//! The business service connects over plain TCP and writes length-prefixed
//! messages. Each accepted socket gets its own [`FrameCodec`](crate::framing::FrameCodec);
//! decoded payloads are published on one listener-wide channel as
//! [`ListenerEvent::Message`], regardless of which connection sent them.
//!
//! # Pausing
//!
//! While paused, decoded messages are queued instead of published. `restart()`
//! flushes the queue in arrival order before new messages go through.

mod connection;
mod gate;

use crate::DEFAULT_LISTENER_ADDRESS;
use crate::error::listener::ListenerError;
use crate::listener::connection::handle_connection;
use crate::listener::gate::MessageGate;

use common::ErrorLocation;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::Location;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::spawn as TokioSpawn;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Events published by an [`EventListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// One decoded frame, as UTF-8 text.
    Message(String),

    /// A connection ended or failed and was removed.
    Disconnect {
        connection_id: Uuid,
        addr: SocketAddr,
    },

    /// The listener stopped accepting connections.
    Close,
}

pub type ListenerEvents = mpsc::UnboundedReceiver<ListenerEvent>;

/// State shared between the listener handle, the accept loop and every
/// connection task.
pub(crate) struct ListenerShared {
    events: mpsc::UnboundedSender<ListenerEvent>,
    gate: Mutex<MessageGate>,
    connections: Mutex<HashMap<Uuid, SocketAddr>>,
}

impl ListenerShared {
    pub(crate) fn deliver(&self, message: String) {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(message) = gate.admit(message) {
            self.publish(ListenerEvent::Message(message));
        }
    }

    pub(crate) fn register(&self, connection_id: Uuid, addr: SocketAddr) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_id, addr);
    }

    pub(crate) fn remove(&self, connection_id: Uuid) {
        let removed = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection_id);

        if let Some(addr) = removed {
            info!("Connection {connection_id} from {addr} disconnected");
            self.publish(ListenerEvent::Disconnect {
                connection_id,
                addr,
            });
        }
    }

    fn publish(&self, event: ListenerEvent) {
        if self.events.send(event).is_err() {
            debug!("Listener event dropped, receiver is gone");
        }
    }
}

struct Bound {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// Accepts framed TCP connections and republishes their messages.
pub struct EventListener {
    shared: Arc<ListenerShared>,
    max_frame_size: usize,
    bound: tokio::sync::Mutex<Option<Bound>>,
}

impl EventListener {
    pub fn new(max_frame_size: usize) -> (Self, ListenerEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        let listener = Self {
            shared: Arc::new(ListenerShared {
                events,
                gate: Mutex::new(MessageGate::default()),
                connections: Mutex::new(HashMap::new()),
            }),
            max_frame_size,
            bound: tokio::sync::Mutex::new(None),
        };
        (listener, receiver)
    }

    /// Bind `address:port` (default address `0.0.0.0`) and start accepting.
    ///
    /// Port `0` asks the OS for a free port; the returned address has the
    /// port actually bound.
    ///
    /// # Errors
    ///
    /// - [`ListenerError::AlreadyListening`] if this listener is already bound
    /// - [`ListenerError::Bind`] if the socket cannot be bound
    pub async fn listen(
        &self,
        port: u16,
        address: Option<&str>,
    ) -> Result<SocketAddr, ListenerError> {
        let mut bound = self.bound.lock().await;
        if let Some(existing) = bound.as_ref() {
            return Err(ListenerError::AlreadyListening {
                message: format!("Listener is already bound to {}", existing.local_addr),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let address = address.unwrap_or(DEFAULT_LISTENER_ADDRESS);
        let listener = TcpListener::bind((address, port))
            .await
            .map_err(|e| ListenerError::Bind {
                message: format!("Failed to bind {address}:{port}: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;
        let local_addr = listener.local_addr()?;

        info!("Event listener bound to {local_addr}");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = TokioSpawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            self.max_frame_size,
            shutdown_rx,
        ));

        *bound = Some(Bound {
            local_addr,
            shutdown,
            accept_task,
        });

        Ok(local_addr)
    }

    /// Stop publishing messages; they queue until [`restart`](Self::restart).
    pub fn pause(&self) {
        self.shared
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pause();
        info!("Event listener paused");
    }

    /// Resume publishing, flushing queued messages in their original order.
    pub fn restart(&self) {
        let mut gate = self
            .shared
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let queued = gate.resume();
        info!("Event listener restarted, flushing {} queued messages", queued.len());
        for message in queued {
            self.shared.publish(ListenerEvent::Message(message));
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_paused()
    }

    pub fn connection_count(&self) -> usize {
        self.shared
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.lock().await.as_ref().map(|b| b.local_addr)
    }

    /// Stop accepting, drop open connections and publish [`ListenerEvent::Close`].
    ///
    /// Closing a listener that is not bound is a no-op.
    pub async fn close(&self) {
        let Some(bound) = self.bound.lock().await.take() else {
            debug!("Event listener close requested but not bound");
            return;
        };

        if bound.shutdown.send(true).is_err() {
            debug!("Accept loop already stopped");
        }
        if let Err(e) = bound.accept_task.await {
            warn!("Accept loop for {} ended abnormally: {e}", bound.local_addr);
        }

        info!("Event listener on {} closed", bound.local_addr);
        self.shared.publish(ListenerEvent::Close);
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<ListenerShared>,
    max_frame_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let connection_id = Uuid::new_v4();
                    info!("Connection {connection_id} accepted from {addr}");
                    shared.register(connection_id, addr);
                    TokioSpawn(handle_connection(
                        stream,
                        connection_id,
                        Arc::clone(&shared),
                        max_frame_size,
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!("Failed to accept connection: {e}"),
            },
            _ = shutdown.changed() => break,
        }
    }
}
