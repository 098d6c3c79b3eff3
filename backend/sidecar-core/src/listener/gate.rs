use std::collections::VecDeque;

/// Holds messages back while the listener is paused.
#[derive(Debug, Default)]
pub(crate) struct MessageGate {
    paused: bool,
    queue: VecDeque<String>,
}

impl MessageGate {
    /// Returns the message if it may be published now, otherwise queues it.
    pub(crate) fn admit(&mut self, message: String) -> Option<String> {
        if self.paused {
            self.queue.push_back(message);
            None
        } else {
            Some(message)
        }
    }

    pub(crate) fn pause(&mut self) {
        self.paused = true;
    }

    /// Reopen the gate and hand back everything queued, oldest first.
    pub(crate) fn resume(&mut self) -> VecDeque<String> {
        self.paused = false;
        std::mem::take(&mut self.queue)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }
}
