use crate::helpers::{KmsPeer, MockKms, connect_service, send_frame, verify_batch_signature};

use sidecar_core::config::{KmsConfig, ListenerConfig, SidecarConfig};
use sidecar_core::error::sidecar::SidecarError;
use sidecar_core::sidecar::{Sidecar, SidecarHandle};
use sidecar_core::store::{BatchStore, EventStore, MemoryStore};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tokio::net::TcpStream;

fn sidecar_config(kms_addr: SocketAddr, batch_size: usize) -> SidecarConfig {
    SidecarConfig {
        service_name: String::from("ledger"),
        batch_size,
        listener: ListenerConfig {
            port: 0,
            address: String::from("127.0.0.1"),
            ..ListenerConfig::default()
        },
        kms: KmsConfig {
            url: format!("ws://{kms_addr}/sidecar"),
            request_timeout_ms: 2_000,
            connect_timeout_ms: 2_000,
            reconnect_interval_ms: 100,
            ..KmsConfig::default()
        },
        ..SidecarConfig::default()
    }
}

/// A registered sidecar with its KMS peer, store and one connected service.
struct Running {
    handle: SidecarHandle,
    peer: KmsPeer,
    store: Arc<MemoryStore>,
    service: TcpStream,
    _kms: MockKms,
}

async fn start_sidecar(batch_size: usize) -> Running {
    let mut kms = MockKms::start().await;
    let store = Arc::new(MemoryStore::new());
    let sidecar = Sidecar::new(sidecar_config(kms.addr, batch_size), Arc::clone(&store));
    let sidecar_id = sidecar.id().to_string();

    let starting = tokio::spawn(sidecar.start());
    let mut peer = kms.accept().await;
    assert_eq!(peer.complete_registration().await, sidecar_id);
    let handle = starting
        .await
        .expect("start task panicked")
        .expect("sidecar started");
    let service = connect_service(handle.local_addr()).await;

    Running {
        handle,
        peer,
        store,
        service,
        _kms: kms,
    }
}

/// **VALUE**: Verifies service messages become signed events and, once enough exist, a
/// signed batch submitted to the KMS.
///
/// **WHY THIS MATTERS**: This is the sidecar's whole purpose. Every message must end up in
/// exactly one batch whose signature the KMS can verify.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - messages are not sequenced from 1
/// - the batch is submitted before it is persisted
/// - the submitted signature does not cover the stored batch data
#[tokio::test]
async fn given_registered_sidecar_when_batch_size_messages_arrive_then_signed_batch_is_sent() {
    // GIVEN: A running sidecar batching every two events
    let mut running = start_sidecar(2).await;

    // WHEN: The service sends two messages
    send_frame(&mut running.service, br#"{"temp":72}"#).await;
    send_frame(&mut running.service, br#"{"temp":73}"#).await;

    // THEN: A batch request arrives, matching the stored batch
    let request = running.peer.expect_request("batch").await;
    let stored = running
        .store
        .batches_between(UNIX_EPOCH, SystemTime::now() + Duration::from_secs(60))
        .expect("store readable");
    assert_eq!(stored.len(), 1);
    let batch = &stored[0];
    assert_eq!(request["params"]["id"], json!(batch.batch_external_id));
    assert_eq!(request["params"]["signature"], json!(batch.signature));
    assert!(verify_batch_signature(&batch.data, &batch.signature));

    let rows: Vec<Value> = serde_json::from_str(&batch.data).expect("batch data is JSON");
    let sequences: Vec<Value> = rows.iter().map(|row| row["row"]["sequence"].clone()).collect();
    assert_eq!(sequences, vec![json!(1), json!(2)]);
    assert_eq!(rows[0]["row"]["message"], json!(r#"{"temp":72}"#));
    assert_eq!(
        running
            .store
            .count_events(running.handle.id(), None, None)
            .expect("store readable"),
        2
    );

    running.peer.reply(&request, json!("OK")).await;
    running.handle.shutdown().await.expect("clean shutdown");
}

/// **VALUE**: Verifies ping health checks are answered and other levels are not.
///
/// **WHY THIS MATTERS**: The KMS monitors liveness with pings; a missing answer marks the
/// sidecar dead.
///
/// **BUG THIS CATCHES**: Would catch responses to unsupported levels, or a snapshot that
/// does not reflect the events processed so far.
#[tokio::test]
async fn given_registered_sidecar_when_kms_sends_health_checks_then_only_ping_is_answered() {
    // GIVEN: A running sidecar that processed one message
    let mut running = start_sidecar(10).await;
    send_frame(&mut running.service, b"hello").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // WHEN: The KMS asks for a details-level check, then a ping
    running
        .peer
        .send(json!({ "jsonrpc": "2.0", "id": 10, "method": "healthcheck", "params": { "level": "details" } }))
        .await;
    running
        .peer
        .send(json!({ "jsonrpc": "2.0", "id": 11, "method": "healthcheck", "params": { "level": "ping" } }))
        .await;

    // THEN: Only the ping gets a response, reporting an operational sidecar
    let response = running.peer.recv().await.expect("health check response");
    assert_eq!(response["id"], json!(11));
    let result = &response["result"];
    assert_eq!(result["status"], json!("OK"));
    assert_eq!(result["id"], json!(running.handle.id()));
    assert_eq!(result["serviceName"], json!("ledger"));
    assert_eq!(result["sequence"], json!(1));

    running.handle.shutdown().await.expect("clean shutdown");
}

/// **VALUE**: Verifies inquiries are answered with one numbered notification per batch.
///
/// **BUG THIS CATCHES**: Would catch zero-based item numbers, a missing total, or a bad
/// time window being silently treated as "no batches".
#[tokio::test]
async fn given_stored_batch_when_kms_inquires_then_responds_per_batch_and_rejects_bad_windows() {
    // GIVEN: A running sidecar with one submitted batch
    let mut running = start_sidecar(1).await;
    send_frame(&mut running.service, b"only").await;
    let request = running.peer.expect_request("batch").await;
    running.peer.reply(&request, json!("OK")).await;

    // WHEN: The KMS inquires about the last hour
    let start = humantime::format_rfc3339_millis(SystemTime::now() - Duration::from_secs(3_600));
    let end = humantime::format_rfc3339_millis(SystemTime::now() + Duration::from_secs(60));
    running
        .peer
        .send(json!({
            "jsonrpc": "2.0",
            "id": 20,
            "method": "inquiry",
            "params": { "inquiry": "audit-1", "startTime": start.to_string(), "endTime": end.to_string() },
        }))
        .await;

    // THEN: One inquiry-response, item 1 of 1
    let response = running.peer.expect_request("inquiry-response").await;
    let params = &response["params"];
    assert_eq!(params["inquiry"], json!("audit-1"));
    assert_eq!(params["id"], request["params"]["id"]);
    assert_eq!(params["total"], json!(1));
    assert_eq!(params["item"], json!(1));
    assert!(params["body"].as_str().is_some_and(|body| body.contains("only")));

    // WHEN: The KMS inquires with an unreadable window
    running
        .peer
        .send(json!({
            "jsonrpc": "2.0",
            "id": 21,
            "method": "inquiry",
            "params": { "inquiry": "audit-2", "startTime": "yesterday", "endTime": "today" },
        }))
        .await;

    // THEN: An invalid-params error
    let error = running.peer.recv().await.expect("error response");
    assert_eq!(error["id"], json!(21));
    assert_eq!(error["error"]["id"], json!(-32602));

    running.handle.shutdown().await.expect("clean shutdown");
}

/// **VALUE**: Verifies a KMS that rejects registration stops the sidecar from starting.
///
/// **BUG THIS CATCHES**: Would catch the listener being bound without keys to sign with.
#[tokio::test]
async fn given_kms_rejects_registration_when_starting_then_start_fails() {
    // GIVEN: A KMS that rejects registration
    let mut kms = MockKms::start().await;
    let store = Arc::new(MemoryStore::new());
    let sidecar = Sidecar::new(sidecar_config(kms.addr, 2), store);
    let starting = tokio::spawn(sidecar.start());
    let mut peer = kms.accept().await;

    // WHEN: Register is answered with an error
    let register = peer.expect_request("register").await;
    peer.reply_error(&register, json!(403), "not allowed").await;

    // THEN: Start fails with the KMS error, and the session is closed
    let result = starting.await.expect("start task panicked");
    assert!(matches!(result, Err(SidecarError::Kms(_))));
    assert!(peer.recv().await.is_none());
}

/// **VALUE**: Verifies shutdown closes the KMS connection.
///
/// **BUG THIS CATCHES**: Would catch shutdown leaving the KMS socket open.
#[tokio::test]
async fn given_running_sidecar_when_shut_down_then_kms_connection_closes() {
    // GIVEN: A running sidecar
    let mut running = start_sidecar(2).await;

    // WHEN: Shutting down
    running.handle.shutdown().await.expect("clean shutdown");

    // THEN: The KMS sees the connection close
    assert!(running.peer.recv().await.is_none());
}
