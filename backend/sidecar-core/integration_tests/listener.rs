use crate::helpers::{RECV_TIMEOUT, connect_service, send_frame};

use sidecar_core::error::listener::ListenerError;
use sidecar_core::listener::{EventListener, ListenerEvent, ListenerEvents};

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

async fn bound_listener(max_frame_size: usize) -> (EventListener, ListenerEvents, SocketAddr) {
    let (listener, events) = EventListener::new(max_frame_size);
    let addr = listener
        .listen(0, Some("127.0.0.1"))
        .await
        .expect("Failed to bind event listener");
    (listener, events, addr)
}

async fn next_event(events: &mut ListenerEvents) -> ListenerEvent {
    timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("Timed out waiting for a listener event")
        .expect("Listener event channel closed")
}

async fn next_message(events: &mut ListenerEvents) -> String {
    match next_event(events).await {
        ListenerEvent::Message(message) => message,
        other => panic!("expected a message, got {other:?}"),
    }
}

/// **VALUE**: Verifies frames split across TCP writes arrive whole and in order.
///
/// **WHY THIS MATTERS**: TCP has no message boundaries. A service writing quickly will
/// regularly have frames coalesced or cut by the network.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - a partial length prefix is treated as a frame
/// - two frames in one read lose the second
/// - multi-byte UTF-8 split across reads is corrupted
#[tokio::test]
async fn given_frames_split_across_writes_when_received_then_published_whole_in_order() {
    // GIVEN: A bound listener and a connected service
    let (listener, mut events, addr) = bound_listener(1024).await;
    let mut service = connect_service(addr).await;

    // WHEN: Writing two frames in awkward pieces
    let mut bytes = Vec::new();
    for payload in ["{\"temp\":72}", "héllo"] {
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload.as_bytes());
    }
    for chunk in [&bytes[..2], &bytes[2..9], &bytes[9..17], &bytes[17..21], &bytes[21..]] {
        service.write_all(chunk).await.expect("write");
        service.flush().await.expect("flush");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // THEN: Both messages, intact and ordered
    assert_eq!(next_message(&mut events).await, "{\"temp\":72}");
    assert_eq!(next_message(&mut events).await, "héllo");

    listener.close().await;
}

/// **VALUE**: Verifies messages received while paused are delivered on restart, in order.
///
/// **WHY THIS MATTERS**: The sidecar pauses ingestion while it re-registers; events that
/// arrive meanwhile must be signed with the new keys, not dropped.
///
/// **BUG THIS CATCHES**: Would catch queued messages being dropped, reordered, or
/// published while still paused.
#[tokio::test]
async fn given_paused_listener_when_messages_arrive_then_held_until_restart() {
    // GIVEN: A paused listener
    let (listener, mut events, addr) = bound_listener(1024).await;
    let mut service = connect_service(addr).await;
    listener.pause();
    assert!(listener.is_paused());

    // WHEN: Messages arrive while paused
    for payload in ["one", "two", "three"] {
        send_frame(&mut service, payload.as_bytes()).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    // THEN: Nothing published yet
    assert!(events.try_recv().is_err());

    // WHEN: Restarting and sending one more
    listener.restart();
    send_frame(&mut service, b"four").await;

    // THEN: All four, in order
    for expected in ["one", "two", "three", "four"] {
        assert_eq!(next_message(&mut events).await, expected);
    }
    assert!(!listener.is_paused());

    listener.close().await;
}

/// **VALUE**: Verifies a service hanging up is reported and forgotten.
///
/// **BUG THIS CATCHES**: Would catch connections leaking in the registry.
#[tokio::test]
async fn given_connected_service_when_it_disconnects_then_disconnect_is_published() {
    // GIVEN: A connected service that sent one message
    let (listener, mut events, addr) = bound_listener(1024).await;
    let mut service = connect_service(addr).await;
    let service_addr = service.local_addr().expect("service address");
    send_frame(&mut service, b"hello").await;
    assert_eq!(next_message(&mut events).await, "hello");
    assert_eq!(listener.connection_count(), 1);

    // WHEN: The service hangs up
    drop(service);

    // THEN: Disconnect naming the peer, registry empty
    match next_event(&mut events).await {
        ListenerEvent::Disconnect { addr, .. } => assert_eq!(addr.port(), service_addr.port()),
        other => panic!("expected Disconnect, got {other:?}"),
    }
    assert_eq!(listener.connection_count(), 0);

    listener.close().await;
}

/// **VALUE**: Verifies an oversized length prefix drops the connection.
///
/// **WHY THIS MATTERS**: A corrupt or hostile prefix would otherwise make the listener
/// buffer gigabytes waiting for a frame that never completes.
///
/// **BUG THIS CATCHES**: Would catch the size limit being ignored.
#[tokio::test]
async fn given_frame_over_limit_when_received_then_connection_is_closed() {
    // GIVEN: A listener accepting frames up to 16 bytes
    let (listener, mut events, addr) = bound_listener(16).await;
    let mut service = connect_service(addr).await;

    // WHEN: Announcing a 1 KiB frame
    service
        .write_all(&1024u32.to_be_bytes())
        .await
        .expect("write prefix");

    // THEN: The connection is removed and the socket closed
    assert!(matches!(next_event(&mut events).await, ListenerEvent::Disconnect { .. }));
    let mut buffer = [0u8; 8];
    let read = timeout(RECV_TIMEOUT, service.read(&mut buffer))
        .await
        .expect("socket should be closed promptly");
    assert!(matches!(read, Ok(0) | Err(_)));

    listener.close().await;
}

/// **VALUE**: Verifies close stops the listener once and binding twice is refused.
///
/// **BUG THIS CATCHES**: Would catch a second close publishing another Close event, or a
/// listener silently rebinding over itself.
#[tokio::test]
async fn given_bound_listener_when_listen_again_and_closed_twice_then_errors_and_closes_once() {
    // GIVEN: A bound listener
    let (listener, mut events, addr) = bound_listener(1024).await;
    assert_eq!(listener.local_addr().await, Some(addr));

    // WHEN/THEN: Listening again is refused
    let again = listener.listen(0, Some("127.0.0.1")).await;
    assert!(matches!(again, Err(ListenerError::AlreadyListening { .. })));

    // WHEN: Closing twice
    listener.close().await;
    listener.close().await;

    // THEN: Exactly one Close, and nothing accepts on the port any more
    assert_eq!(next_event(&mut events).await, ListenerEvent::Close);
    assert!(events.try_recv().is_err());
    assert_eq!(listener.local_addr().await, None);
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
