//! Periodic ping over the KMS transport.
//!
//! The monitor only generates traffic. Failure detection is left to the
//! transport: a dead peer surfaces as a read error or close on the session.

use models::timestamp::to_iso8601;

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use log::{debug, trace};
use serde_json::json;
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_tungstenite::tungstenite::Message;

pub struct KeepAlive {
    interval: Duration,
    outbound: mpsc::UnboundedSender<Message>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAlive {
    pub fn new(interval: Duration, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            interval,
            outbound,
            task: Mutex::new(None),
        }
    }

    /// Start pinging every `interval`. The first ping goes out one interval from now.
    ///
    /// Returns `false` if the monitor was already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            trace!("Keep-alive already running");
            return false;
        }

        let period = self.interval;
        let outbound = self.outbound.clone();
        *task = Some(TokioSpawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let payload = json!({ "timestamp": to_iso8601(SystemTime::now()) }).to_string();
                trace!("Sending keep-alive ping {payload}");
                if outbound.send(Message::Ping(payload.into())).is_err() {
                    debug!("Keep-alive stopping, transport writer is gone");
                    break;
                }
            }
        }));

        debug!("Keep-alive started with interval {}ms", period.as_millis());
        true
    }

    /// Cancel the ping timer. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match task {
            Some(task) => {
                task.abort();
                debug!("Keep-alive stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}
