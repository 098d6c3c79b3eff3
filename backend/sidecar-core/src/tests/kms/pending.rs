use crate::error::kms::KmsError;
use crate::kms::pending::PendingRequests;

use std::cell::Cell;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;

const TIMEOUT: Duration = Duration::from_millis(5_000);

/// **VALUE**: Verifies a response settles the request and later timers are no-ops.
///
/// **WHY THIS MATTERS**: Completion and timeout race for the same entry. If the timer
/// still fired after a response, callers would see a result followed by a timeout.
///
/// **BUG THIS CATCHES**: Would catch a timer that is not cancelled or an entry that is
/// not removed on completion.
#[tokio::test(start_paused = true)]
async fn given_pending_request_when_completed_then_resolves_once_and_timer_is_noop() {
    // GIVEN: A pending request
    let table = PendingRequests::new(TIMEOUT);
    let pending = table
        .start(Some(String::from("r-1")), |_| Ok(()))
        .expect("request registered");

    // WHEN: The response arrives
    let completed = table.complete("r-1", Ok(json!({ "ok": true })));

    // THEN: It resolves with the response and the entry is gone at once
    assert!(completed);
    assert!(!table.exists("r-1"));
    assert_eq!(pending.response().await.expect("response"), json!({ "ok": true }));

    // THEN: Neither the timeout nor a second completion does anything
    sleep(TIMEOUT * 2).await;
    assert!(!table.complete("r-1", Ok(json!(null))));
    assert!(table.is_empty());
}

/// **VALUE**: Verifies an unanswered request fails with a timeout and is removed.
///
/// **WHY THIS MATTERS**: A KMS that never replies must not leave callers waiting forever
/// or leak table entries.
///
/// **BUG THIS CATCHES**: Would catch a timer that rejects but leaves the entry, so that a
/// late response is treated as valid.
#[tokio::test(start_paused = true)]
async fn given_pending_request_when_timeout_elapses_then_rejects_and_late_response_is_noop() {
    // GIVEN: A pending request
    let table = PendingRequests::new(TIMEOUT);
    let pending = table
        .start(Some(String::from("r-2")), |_| Ok(()))
        .expect("request registered");

    // WHEN: Waiting for the outcome with no response
    let outcome = pending.response().await;

    // THEN: Timeout error naming the request, entry removed
    match outcome {
        Err(KmsError::RequestTimeout { id, timeout_ms, .. }) => {
            assert_eq!(id, "r-2");
            assert_eq!(timeout_ms, 5_000);
        }
        other => panic!("Expected RequestTimeout, got {other:?}"),
    }
    assert!(!table.exists("r-2"));

    // THEN: A late response finds nothing
    assert!(!table.complete("r-2", Ok(json!(null))));
}

/// **VALUE**: Verifies a timeout too large for milliseconds in a `u64` saturates.
///
/// **BUG THIS CATCHES**: Would catch an `as` cast wrapping the reported timeout to a
/// small, misleading number.
#[tokio::test(start_paused = true)]
async fn given_unbounded_timeout_when_elapsed_then_reports_saturated_millis() {
    // GIVEN: A table whose timeout does not fit in u64 milliseconds
    let table = PendingRequests::new(Duration::MAX);
    let pending = table
        .start(Some(String::from("r-max")), |_| Ok(()))
        .expect("request registered");

    // WHEN: The timer fires
    let outcome = pending.response().await;

    // THEN: The reported timeout is clamped
    match outcome {
        Err(KmsError::RequestTimeout { timeout_ms, .. }) => assert_eq!(timeout_ms, u64::MAX),
        other => panic!("Expected RequestTimeout, got {other:?}"),
    }
}

/// **VALUE**: Verifies the send callback sees the registered id and runs exactly once.
///
/// **WHY THIS MATTERS**: The id in the outbound envelope must be the id in the table,
/// including generated ones.
///
/// **BUG THIS CATCHES**: Would catch generating the id after sending or sending twice.
#[tokio::test(start_paused = true)]
async fn given_no_id_when_started_then_generates_id_and_passes_it_to_send() {
    // GIVEN: A table and a callback that records its argument
    let table = PendingRequests::new(TIMEOUT);
    let calls = Cell::new(0);
    let mut seen = String::new();

    // WHEN: Starting without an id
    let pending = table
        .start(None, |id| {
            calls.set(calls.get() + 1);
            seen = id.to_string();
            Ok(())
        })
        .expect("request registered");

    // THEN: The generated id is the tracked one
    assert_eq!(calls.get(), 1);
    assert_eq!(pending.id(), seen);
    assert!(table.exists(&seen));
}

/// **VALUE**: Verifies an id cannot be pending twice.
///
/// **WHY THIS MATTERS**: Two callers sharing an id would race for one response.
///
/// **BUG THIS CATCHES**: Would catch the second insert silently replacing the first.
#[tokio::test(start_paused = true)]
async fn given_outstanding_id_when_started_again_then_returns_duplicate_error() {
    // GIVEN: An outstanding request
    let table = PendingRequests::new(TIMEOUT);
    let _first = table
        .start(Some(String::from("dup")), |_| Ok(()))
        .expect("request registered");

    // WHEN: Starting another with the same id
    let second = table.start(Some(String::from("dup")), |_| Ok(()));

    // THEN: Rejected, the first one untouched
    assert!(matches!(second, Err(KmsError::DuplicateRequestId { .. })));
    assert_eq!(table.len(), 1);
}

/// **VALUE**: Verifies a failed send withdraws the entry.
///
/// **WHY THIS MATTERS**: A request that never left the process can never be answered.
///
/// **BUG THIS CATCHES**: Would catch leaked entries that only disappear on timeout.
#[tokio::test(start_paused = true)]
async fn given_send_failure_when_started_then_returns_error_and_leaves_no_entry() {
    // GIVEN: A table
    let table = PendingRequests::new(TIMEOUT);

    // WHEN: The send callback fails
    let result = table.start(Some(String::from("r-3")), |_| {
        Err(KmsError::Send {
            message: String::from("writer gone"),
            location: common::ErrorLocation::from(std::panic::Location::caller()),
        })
    });

    // THEN: The error surfaces and nothing is tracked
    assert!(matches!(result, Err(KmsError::Send { .. })));
    assert!(!table.exists("r-3"));
}
