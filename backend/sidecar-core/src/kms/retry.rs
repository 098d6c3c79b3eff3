use std::io::ErrorKind;

use tokio_tungstenite::tungstenite::Error as WsError;

/// Decides which connect failures are worth another attempt.
///
/// Only I/O errors whose kind is in the retryable set qualify. TLS failures,
/// rejected HTTP upgrades, bad URLs and protocol violations are fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    retryable: Vec<ErrorKind>,
}

impl RetryPolicy {
    pub fn new(retryable: Vec<ErrorKind>) -> Self {
        Self { retryable }
    }

    /// A policy that never retries.
    pub fn never() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_retryable(&self, error: &WsError) -> bool {
        match error {
            WsError::Io(io) => self.retryable.contains(&io.kind()),
            _ => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            ErrorKind::ConnectionRefused,
            ErrorKind::ConnectionReset,
            ErrorKind::ConnectionAborted,
            ErrorKind::NotConnected,
        ])
    }
}
