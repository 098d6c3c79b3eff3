use crate::kms::keep_alive::KeepAlive;

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;

const INTERVAL: Duration = Duration::from_millis(30_000);

fn drain_pings(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
    let mut pings = Vec::new();
    while let Ok(message) = rx.try_recv() {
        pings.push(message);
    }
    pings
}

/// **VALUE**: Verifies starting twice still produces one ping per interval.
///
/// **WHY THIS MATTERS**: `start()` runs on every connect. A second timer would double the
/// ping rate on each reconnect.
///
/// **BUG THIS CATCHES**: Would catch `start()` spawning a new task without checking for a
/// running one.
#[tokio::test(start_paused = true)]
async fn given_started_twice_when_one_interval_passes_then_exactly_one_ping_is_sent() {
    // GIVEN: A keep-alive started twice
    let (tx, mut rx) = mpsc::unbounded_channel();
    let keep_alive = KeepAlive::new(INTERVAL, tx);
    assert!(keep_alive.start());
    assert!(!keep_alive.start());

    // WHEN: One interval passes
    sleep(INTERVAL + Duration::from_millis(1)).await;

    // THEN: Exactly one ping
    let pings = drain_pings(&mut rx);
    assert_eq!(pings.len(), 1, "Expected one ping, got {pings:?}");
}

/// **VALUE**: Verifies pings carry a parseable UTC timestamp.
///
/// **WHY THIS MATTERS**: The KMS echoes the payload in its pong; the round trip is computed
/// from this timestamp.
///
/// **BUG THIS CATCHES**: Would catch an empty ping payload or a non-ISO timestamp.
#[tokio::test(start_paused = true)]
async fn given_running_keep_alive_when_ping_sent_then_payload_has_iso_timestamp() {
    // GIVEN: A running keep-alive
    let (tx, mut rx) = mpsc::unbounded_channel();
    let keep_alive = KeepAlive::new(INTERVAL, tx);
    keep_alive.start();

    // WHEN: One interval passes
    sleep(INTERVAL + Duration::from_millis(1)).await;

    // THEN: The ping payload is {"timestamp": <ISO-8601>}
    let Some(Message::Ping(payload)) = drain_pings(&mut rx).into_iter().next() else {
        panic!("Expected a ping frame");
    };
    let body: Value = serde_json::from_slice(&payload).expect("JSON payload");
    let timestamp = body["timestamp"].as_str().expect("timestamp field");
    assert!(humantime::parse_rfc3339_weak(timestamp).is_ok(), "{timestamp} is not RFC 3339");
}

/// **VALUE**: Verifies `stop()` cancels the timer and is idempotent.
///
/// **WHY THIS MATTERS**: Teardown stops keep-alive on every close; pings into a dead
/// transport would only produce send errors.
///
/// **BUG THIS CATCHES**: Would catch `stop()` leaving the task running.
#[tokio::test(start_paused = true)]
async fn given_stopped_keep_alive_when_intervals_pass_then_no_ping_is_sent() {
    // GIVEN: A keep-alive started then stopped
    let (tx, mut rx) = mpsc::unbounded_channel();
    let keep_alive = KeepAlive::new(INTERVAL, tx);
    keep_alive.start();
    assert!(keep_alive.stop());
    assert!(!keep_alive.stop());

    // WHEN: Several intervals pass
    sleep(INTERVAL * 3).await;

    // THEN: Silence
    assert!(drain_pings(&mut rx).is_empty());
    assert!(!keep_alive.is_running());
}
