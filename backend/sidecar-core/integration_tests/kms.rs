use crate::helpers::{
    BATCH_KEY, CHALLENGE, MockKms, RECV_TIMEOUT, ROW_KEY, assert_challenge_signed, test_settings,
};

use sidecar_core::error::{KmsError, RegistrationFailure};
use sidecar_core::kms::{KmsEvent, KmsEvents, KmsSession, RegistrationStep, RetryPolicy, SessionState};

use std::time::Duration;

use models::KmsKeys;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

// ============================================================================
// Helpers
// ============================================================================

async fn connected_session(kms: &MockKms) -> (KmsSession, KmsEvents) {
    let (session, events) = KmsSession::new(test_settings(kms.addr));
    session.connect().await.expect("Failed to connect to mock KMS");
    (session, events)
}

fn start_registration(session: &KmsSession, sidecar_id: &str) -> JoinHandle<Result<KmsKeys, KmsError>> {
    let session = session.clone();
    let sidecar_id = sidecar_id.to_string();
    tokio::spawn(async move { session.register(&sidecar_id, "ledger").await })
}

async fn next_event(events: &mut KmsEvents) -> KmsEvent {
    timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("Timed out waiting for a KMS event")
        .expect("KMS event channel closed")
}

fn registration_failure(result: Result<KmsKeys, KmsError>) -> RegistrationFailure {
    match result {
        Err(KmsError::Registration { reason, .. }) => reason,
        other => panic!("expected a registration failure, got {other:?}"),
    }
}

// ============================================================================
// Registration handshake
// ============================================================================

/// **VALUE**: Verifies the full register/challenge handshake against a KMS.
///
/// **WHY THIS MATTERS**: Nothing is signed or submitted until the sidecar holds keys. The
/// KMS only issues them after the challenge is signed with both keys.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - the register request id or params drift from what the KMS expects
/// - the challenge is signed with the wrong key or algorithm
/// - the session does not reach OPERATIONAL after an OK status
#[tokio::test]
async fn given_healthy_kms_when_registering_then_returns_keys_and_becomes_operational() {
    // GIVEN: A connected session
    let mut kms = MockKms::start().await;
    let (session, _events) = connected_session(&kms).await;
    let mut peer = kms.accept().await;
    assert_eq!(session.state(), SessionState::Connected);

    // WHEN: Registering
    let registration = start_registration(&session, "sidecar-1");

    // THEN: The register request carries the sidecar id and service name
    let register = peer.expect_request("register").await;
    assert_eq!(register["id"], json!("register-sidecar-1"));
    assert_eq!(register["params"], json!({ "id": "sidecar-1", "serviceName": "ledger" }));
    peer.reply(
        &register,
        json!({ "id": "sidecar-1", "rowKey": ROW_KEY, "batchKey": BATCH_KEY, "challenge": CHALLENGE }),
    )
    .await;

    // THEN: The challenge is signed with both issued keys
    let challenge = peer.expect_request("challenge").await;
    assert_challenge_signed(&challenge["params"]);
    peer.reply(&challenge, json!({ "status": "ok" })).await;

    // THEN: Keys returned, session operational
    let keys = registration
        .await
        .expect("registration task panicked")
        .expect("registration succeeded");
    assert_eq!(keys.row_key.expose(), ROW_KEY);
    assert_eq!(keys.batch_key.expose(), BATCH_KEY);
    assert_eq!(session.state(), SessionState::Operational);

    session.close().await;
}

/// **VALUE**: Verifies a KMS error on the register step fails registration with its code.
///
/// **BUG THIS CATCHES**: Would catch a rejection being reported as a timeout, or the session
/// staying in REGISTERING.
#[tokio::test]
async fn given_kms_rejects_register_when_registering_then_fails_at_register_step() {
    // GIVEN: A connected session
    let mut kms = MockKms::start().await;
    let (session, _events) = connected_session(&kms).await;
    let mut peer = kms.accept().await;

    // WHEN: The KMS rejects the register request
    let registration = start_registration(&session, "sidecar-1");
    let register = peer.expect_request("register").await;
    peer.reply_error(&register, json!("UnknownService"), "no such service").await;

    // THEN: Registration failed at the register step
    let failure = registration_failure(registration.await.expect("registration task panicked"));
    assert_eq!(
        failure,
        RegistrationFailure::Rejected {
            step: RegistrationStep::AwaitingRegisterResponse,
            code: String::from("UnknownService"),
            message: String::from("no such service"),
        }
    );
    assert_eq!(session.state(), SessionState::RegistrationFailed);

    // THEN: No challenge follows a rejected register
    assert!(peer.is_quiet_for(Duration::from_millis(200)).await);

    session.close().await;
}

/// **VALUE**: Verifies a KMS error on the challenge step is attributed to that step.
///
/// **WHY THIS MATTERS**: A challenge rejection means the signatures were wrong, which is a
/// different operational problem from an unknown service at the register step.
///
/// **BUG THIS CATCHES**: Would catch both steps reporting the same failure.
#[tokio::test]
async fn given_kms_rejects_challenge_when_registering_then_fails_at_challenge_step() {
    // GIVEN: A connected session past the register step
    let mut kms = MockKms::start().await;
    let (session, _events) = connected_session(&kms).await;
    let mut peer = kms.accept().await;
    let registration = start_registration(&session, "sidecar-1");
    let register = peer.expect_request("register").await;
    peer.reply(
        &register,
        json!({ "rowKey": ROW_KEY, "batchKey": BATCH_KEY, "challenge": CHALLENGE }),
    )
    .await;

    // WHEN: The challenge request is answered with an error
    let challenge = peer.expect_request("challenge").await;
    peer.reply_error(&challenge, json!(401), "signature mismatch").await;

    // THEN: Registration failed at the challenge step, nothing else was sent
    let failure = registration_failure(registration.await.expect("registration task panicked"));
    assert!(matches!(
        failure,
        RegistrationFailure::Rejected {
            step: RegistrationStep::AwaitingChallengeResponse,
            ..
        }
    ));
    assert!(peer.is_quiet_for(Duration::from_millis(200)).await);

    session.close().await;
}

/// **VALUE**: Verifies keys issued for another sidecar are refused.
///
/// **WHY THIS MATTERS**: Signing with another sidecar's keys would attribute our events to it.
///
/// **BUG THIS CATCHES**: Would catch the id in the register result being ignored.
#[tokio::test]
async fn given_register_result_for_other_sidecar_when_registering_then_fails_without_challenge() {
    // GIVEN: A connected session
    let mut kms = MockKms::start().await;
    let (session, _events) = connected_session(&kms).await;
    let mut peer = kms.accept().await;

    // WHEN: The KMS answers with a different sidecar id
    let registration = start_registration(&session, "sidecar-1");
    let register = peer.expect_request("register").await;
    peer.reply(
        &register,
        json!({ "id": "sidecar-2", "rowKey": ROW_KEY, "batchKey": BATCH_KEY, "challenge": "c" }),
    )
    .await;

    // THEN: Registration fails and no challenge is sent
    let failure = registration_failure(registration.await.expect("registration task panicked"));
    assert!(matches!(failure, RegistrationFailure::UnexpectedSidecar { .. }));
    assert!(peer.is_quiet_for(Duration::from_millis(200)).await);

    session.close().await;
}

/// **VALUE**: Verifies a challenge status other than OK fails registration.
///
/// **BUG THIS CATCHES**: Would catch any challenge response being treated as success.
#[tokio::test]
async fn given_challenge_not_ok_when_registering_then_fails_with_status() {
    // GIVEN: A connected session past the register step
    let mut kms = MockKms::start().await;
    let (session, _events) = connected_session(&kms).await;
    let mut peer = kms.accept().await;
    let registration = start_registration(&session, "sidecar-1");
    let register = peer.expect_request("register").await;
    peer.reply(
        &register,
        json!({ "rowKey": ROW_KEY, "batchKey": BATCH_KEY, "challenge": "c" }),
    )
    .await;

    // WHEN: The challenge is answered with a failure status
    let challenge = peer.expect_request("challenge").await;
    peer.reply(&challenge, json!({ "status": "INVALID_SIGNATURE" })).await;

    // THEN: Registration fails with that status
    let failure = registration_failure(registration.await.expect("registration task panicked"));
    assert_eq!(
        failure,
        RegistrationFailure::ChallengeStatus {
            status: String::from("INVALID_SIGNATURE"),
        }
    );
    assert_eq!(session.state(), SessionState::RegistrationFailed);

    session.close().await;
}

/// **VALUE**: Verifies registering without a transport fails immediately.
///
/// **BUG THIS CATCHES**: Would catch a register request waiting out the full timeout.
#[tokio::test]
async fn given_disconnected_session_when_registering_then_returns_not_connected() {
    // GIVEN: A session that never connected
    let kms = MockKms::start().await;
    let (session, _events) = KmsSession::new(test_settings(kms.addr));

    // WHEN: Registering
    let result = session.register("sidecar-1", "ledger").await;

    // THEN: Not connected
    assert!(matches!(result, Err(KmsError::NotConnected { .. })));
    assert_eq!(session.state(), SessionState::Disconnected);
}

// ============================================================================
// Connect
// ============================================================================

/// **VALUE**: Verifies a refused connection is fatal when the retry policy says so.
///
/// **BUG THIS CATCHES**: Would catch `connect` looping forever on a fatal error.
#[tokio::test]
async fn given_nothing_listening_and_no_retries_when_connecting_then_fails_with_transport_error() {
    // GIVEN: An address that refuses connections
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("address");
    drop(listener);
    let (session, _events) = KmsSession::with_retry_policy(test_settings(addr), RetryPolicy::never());

    // WHEN: Connecting
    let result = session.connect().await;

    // THEN: Transport error, state CONNECT_FAILED
    assert!(matches!(result, Err(KmsError::Transport { retryable: false, .. })));
    assert_eq!(session.state(), SessionState::ConnectFailed);
}

/// **VALUE**: Verifies a KMS that accepts TCP but never finishes the WebSocket handshake
/// fails the connect with a timeout.
///
/// **WHY THIS MATTERS**: A hung upgrade would otherwise block startup forever.
///
/// **BUG THIS CATCHES**: Would catch the attempt being left open after the timeout, or
/// the timeout being reported as a transport error.
#[tokio::test]
async fn given_kms_never_completes_handshake_when_connecting_then_times_out_and_drops_attempt() {
    // GIVEN: A TCP listener that accepts and then says nothing
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let mut settings = test_settings(listener.local_addr().expect("address"));
    settings.connect_timeout = Duration::from_millis(300);
    let (session, _events) = KmsSession::new(settings);
    let accepted = tokio::spawn(async move { listener.accept().await.expect("accept").0 });

    // WHEN: Connecting
    let result = session.connect().await;

    // THEN: Connect timeout, state CONNECT_FAILED
    assert!(matches!(result, Err(KmsError::ConnectTimeout { timeout_ms: 300, .. })));
    assert_eq!(session.state(), SessionState::ConnectFailed);

    // THEN: The abandoned attempt's socket is closed
    let mut stream = accepted.await.expect("accept task panicked");
    let mut buffer = Vec::new();
    let _end = timeout(RECV_TIMEOUT, stream.read_to_end(&mut buffer))
        .await
        .expect("abandoned attempt socket left open");
    assert!(buffer.starts_with(b"GET "), "the attempt had sent its upgrade request");
}

/// **VALUE**: Verifies refused connections are retried until the KMS comes up.
///
/// **WHY THIS MATTERS**: Sidecars often start before the KMS is reachable.
///
/// **BUG THIS CATCHES**: Would catch the default policy treating "connection refused" as fatal.
#[tokio::test]
async fn given_kms_starts_late_when_connecting_then_retries_until_connected() {
    // GIVEN: A port nobody listens on yet
    let probe = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = probe.local_addr().expect("address");
    drop(probe);
    let (session, _events) = KmsSession::new(test_settings(addr));

    // WHEN: Connecting while the KMS comes up a little later
    let connecting = {
        let session = session.clone();
        tokio::spawn(async move { session.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(250)).await;
    let listener = TcpListener::bind(addr).await.expect("rebind KMS port");
    let accepted = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio_tungstenite::accept_async(stream).await.expect("handshake")
    });

    // THEN: Connect eventually succeeds
    timeout(RECV_TIMEOUT, connecting)
        .await
        .expect("connect kept retrying too long")
        .expect("connect task panicked")
        .expect("connected");
    assert_eq!(session.state(), SessionState::Connected);

    let _ws = accepted.await.expect("accept task panicked");
    session.close().await;
}

// ============================================================================
// Inbound traffic
// ============================================================================

/// **VALUE**: Verifies KMS-initiated requests surface as events and junk is dropped.
///
/// **WHY THIS MATTERS**: A malformed or unknown frame must not stop later requests from
/// being handled.
///
/// **BUG THIS CATCHES**: Would catch the reader task dying on bad input.
#[tokio::test]
async fn given_junk_then_healthcheck_when_received_then_only_healthcheck_is_published() {
    // GIVEN: A connected session
    let mut kms = MockKms::start().await;
    let (session, mut events) = connected_session(&kms).await;
    let mut peer = kms.accept().await;

    // WHEN: The KMS sends junk, an unknown method, then a health check
    peer.send_raw("this is not json").await;
    peer.send(json!({ "jsonrpc": "2.0", "id": 7, "method": "reboot", "params": {} })).await;
    peer.send(json!({ "jsonrpc": "2.0", "id": 8, "method": "healthcheck", "params": { "level": "ping" } }))
        .await;

    // THEN: Only the health check arrives
    match next_event(&mut events).await {
        KmsEvent::HealthCheck(request) => {
            assert_eq!(request.id, json!(8));
            assert_eq!(request.level, "ping");
        }
        other => panic!("expected a health check, got {other:?}"),
    }

    session.close().await;
}

/// **VALUE**: Verifies a ping from the KMS is answered with a pong echoing its payload.
///
/// **BUG THIS CATCHES**: Would catch the reader swallowing pings, which makes the KMS
/// consider the sidecar dead.
#[tokio::test]
async fn given_kms_ping_when_received_then_pong_echoes_payload() {
    // GIVEN: A connected session
    let mut kms = MockKms::start().await;
    let (session, _events) = connected_session(&kms).await;
    let mut peer = kms.accept().await;

    // WHEN: The KMS pings
    let pong = peer.ping("are-you-there").await;

    // THEN: The pong carries the same payload
    assert_eq!(pong, b"are-you-there".to_vec());

    session.close().await;
}

/// **VALUE**: Verifies a response for an unknown id does not settle another request.
///
/// **BUG THIS CATCHES**: Would catch responses being matched to whatever request is oldest.
#[tokio::test]
async fn given_response_for_unknown_id_when_received_then_pending_request_still_waits_for_its_own() {
    // GIVEN: A request in flight
    let mut kms = MockKms::start().await;
    let (session, _events) = connected_session(&kms).await;
    let mut peer = kms.accept().await;
    let in_flight = {
        let session = session.clone();
        tokio::spawn(async move { session.request("batch", json!({ "id": "b-1" })).await })
    };
    let request = peer.expect_request("batch").await;

    // WHEN: A response for some other id arrives first
    peer.send(json!({ "jsonrpc": "2.0", "id": "not-ours", "result": "wrong" })).await;
    peer.reply(&request, json!("accepted")).await;

    // THEN: The request gets its own result
    let result = in_flight
        .await
        .expect("request task panicked")
        .expect("request answered");
    assert_eq!(result, json!("accepted"));

    session.close().await;
}

/// **VALUE**: Verifies an unanswered request times out.
///
/// **BUG THIS CATCHES**: Would catch callers hanging forever on a silent KMS.
#[tokio::test]
async fn given_silent_kms_when_requesting_then_times_out() {
    // GIVEN: A connected session with a short request timeout
    let mut kms = MockKms::start().await;
    let mut settings = test_settings(kms.addr);
    settings.request_timeout = Duration::from_millis(100);
    let (session, _events) = KmsSession::new(settings);
    session.connect().await.expect("connected");
    let mut peer = kms.accept().await;

    // WHEN: Sending a request the KMS never answers
    let result = session.request("batch", json!({})).await;

    // THEN: Request timeout
    assert!(matches!(result, Err(KmsError::RequestTimeout { timeout_ms: 100, .. })));
    peer.expect_request("batch").await;

    session.close().await;
}

// ============================================================================
// Disconnects
// ============================================================================

/// **VALUE**: Verifies an unexpected close is followed by an automatic reconnect.
///
/// **WHY THIS MATTERS**: The owner must learn about both the drop and the new transport,
/// since registration has to be redone on the new connection.
///
/// **BUG THIS CATCHES**: Would catch a missing reconnect, or `Reconnected` being emitted
/// before the transport is actually open.
#[tokio::test]
async fn given_operational_session_when_kms_closes_then_reconnects_and_reports_it() {
    // GIVEN: A connected session
    let mut kms = MockKms::start().await;
    let (session, mut events) = connected_session(&kms).await;
    let peer = kms.accept().await;

    // WHEN: The KMS drops the connection
    peer.close().await;

    // THEN: Disconnected for epoch 1, then reconnected on epoch 2
    match next_event(&mut events).await {
        KmsEvent::Disconnected { epoch, .. } => assert_eq!(epoch, 1),
        other => panic!("expected Disconnected, got {other:?}"),
    }
    let _second = kms.accept().await;
    match next_event(&mut events).await {
        KmsEvent::Reconnected { epoch } => assert_eq!(epoch, 2),
        other => panic!("expected Reconnected, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Connected);

    session.close().await;
}

/// **VALUE**: Verifies closing the session does not trigger a reconnect.
///
/// **BUG THIS CATCHES**: Would catch the session reconnecting after its owner shut it down.
#[tokio::test]
async fn given_connected_session_when_closed_twice_then_disconnects_once_without_reconnecting() {
    // GIVEN: A connected session
    let mut kms = MockKms::start().await;
    let (session, mut events) = connected_session(&kms).await;
    let mut peer = kms.accept().await;

    // WHEN: Closing it twice
    let closing = {
        let session = session.clone();
        tokio::spawn(async move { session.close().await })
    };
    assert!(peer.recv().await.is_none(), "sidecar should close the socket");
    closing.await.expect("close task panicked");
    session.close().await;

    // THEN: One Disconnected event and no reconnect
    assert!(matches!(next_event(&mut events).await, KmsEvent::Disconnected { .. }));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(session.state(), SessionState::Disconnected);
}

/// **VALUE**: Verifies a KMS that closes right after the handshake is always noticed.
///
/// **WHY THIS MATTERS**: The close can reach the reader before `connect` has returned. If
/// that end is lost, the session sits in CONNECTED on a dead transport, requests only ever
/// time out and no reconnect happens.
///
/// **BUG THIS CATCHES**: Would catch the reader running before its epoch is installed, or
/// the connected state being set after the epoch already ended.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_kms_closing_immediately_after_handshake_when_connecting_then_disconnects_and_reconnects() {
    for attempt in 0..20 {
        // GIVEN: A KMS that closes every first connection at once
        let mut kms = MockKms::start().await;
        let (session, mut events) = KmsSession::new(test_settings(kms.addr));

        // WHEN: Connecting while the KMS closes
        let (connected, ()) = tokio::join!(session.connect(), async {
            kms.accept().await.close().await;
        });
        connected.expect("connected");

        // THEN: The drop is reported and a new transport replaces it
        loop {
            match next_event(&mut events).await {
                KmsEvent::Disconnected { epoch, .. } => {
                    assert_eq!(epoch, 1, "attempt {attempt}");
                    break;
                }
                KmsEvent::TransportError { epoch, .. } => assert_eq!(epoch, 1, "attempt {attempt}"),
                other => panic!("attempt {attempt}: expected Disconnected, got {other:?}"),
            }
        }
        let _second = kms.accept().await;
        match next_event(&mut events).await {
            KmsEvent::Reconnected { epoch } => assert_eq!(epoch, 2, "attempt {attempt}"),
            other => panic!("attempt {attempt}: expected Reconnected, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Connected, "attempt {attempt}");

        session.close().await;
    }
}
