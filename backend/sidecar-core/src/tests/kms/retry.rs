use crate::kms::retry::RetryPolicy;

use std::io::{Error as IoError, ErrorKind};

use tokio_tungstenite::tungstenite::Error as WsError;

/// **VALUE**: Verifies the default policy retries refused and dropped connections only.
///
/// **WHY THIS MATTERS**: The sidecar usually starts before the KMS is up; a refused
/// connection must be retried. A bad URL or a rejected upgrade will never fix itself.
///
/// **BUG THIS CATCHES**: Would catch fatal errors being retried forever, or refused
/// connections failing startup.
#[test]
fn given_default_policy_when_classifying_errors_then_only_connection_failures_retry() {
    // GIVEN: The default policy
    let policy = RetryPolicy::default();

    // WHEN/THEN: Connection-level I/O failures are retryable
    for kind in [
        ErrorKind::ConnectionRefused,
        ErrorKind::ConnectionReset,
        ErrorKind::ConnectionAborted,
        ErrorKind::NotConnected,
    ] {
        assert!(
            policy.is_retryable(&WsError::Io(IoError::from(kind))),
            "{kind:?} should be retryable"
        );
    }

    // WHEN/THEN: Everything else is fatal
    assert!(!policy.is_retryable(&WsError::Io(IoError::from(ErrorKind::PermissionDenied))));
    assert!(!policy.is_retryable(&WsError::ConnectionClosed));
    assert!(!RetryPolicy::never().is_retryable(&WsError::Io(IoError::from(
        ErrorKind::ConnectionRefused
    ))));
}
