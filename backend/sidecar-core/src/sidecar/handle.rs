use crate::error::sidecar::SidecarError;

use common::ErrorLocation;

use std::net::SocketAddr;
use std::panic::Location;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to a running sidecar.
///
/// Dropping the handle leaves the sidecar running; call
/// [`shutdown`](Self::shutdown) to stop it.
pub struct SidecarHandle {
    id: String,
    local_addr: SocketAddr,
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SidecarHandle {
    pub(crate) fn new(
        id: String,
        local_addr: SocketAddr,
        shutdown: mpsc::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            local_addr,
            shutdown,
            task,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Address the event listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listener and the KMS session, then wait for the router to finish.
    ///
    /// # Errors
    ///
    /// Returns [`SidecarError::Shutdown`] if the router task panicked.
    pub async fn shutdown(self) -> Result<(), SidecarError> {
        info!("Shutting down sidecar {}", self.id);
        if self.shutdown.send(()).await.is_err() {
            debug!("Router for sidecar {} already stopped", self.id);
        }

        self.task.await.map_err(|e| SidecarError::Shutdown {
            message: format!("Router task for sidecar {} failed: {e}", self.id),
            location: ErrorLocation::from(Location::caller()),
        })
    }
}
