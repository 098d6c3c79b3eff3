//! Test helpers for the integration tests.
//!
//! - an in-process mock KMS speaking the JSON-RPC dialect over WebSocket
//! - a framed TCP client for the event listener
//! - keys and settings shared across tests

use sidecar_core::crypto::{asymmetric, symmetric};
use sidecar_core::kms::KmsSettings;

use std::net::SocketAddr;
use std::time::Duration;

use ed25519_dalek::{Signature, VerifyingKey};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

/// Row key issued by the mock KMS (hex, AES-256-CMAC).
pub const ROW_KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

/// Batch key issued by the mock KMS (hex Ed25519 seed, RFC 8032 test 1).
pub const BATCH_KEY: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

pub const CHALLENGE: &str = "prove-you-hold-the-keys";

/// How long a test waits for any single frame before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Session settings pointing at `addr`, tuned for fast tests.
pub fn test_settings(addr: SocketAddr) -> KmsSettings {
    KmsSettings {
        url: format!("ws://{addr}/sidecar"),
        ping_interval: Duration::from_secs(30),
        request_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        reconnect_interval: Duration::from_millis(100),
        auto_reconnect: true,
    }
}

/// A WebSocket server standing in for the KMS. Each accepted connection is
/// handed to the test as a [`KmsPeer`].
pub struct MockKms {
    pub addr: SocketAddr,
    peers: mpsc::UnboundedReceiver<KmsPeer>,
    task: JoinHandle<()>,
}

impl MockKms {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock KMS");
        let addr = listener.local_addr().expect("Mock KMS has an address");
        let (sender, peers) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                if sender.send(KmsPeer { ws }).is_err() {
                    break;
                }
            }
        });

        Self { addr, peers, task }
    }

    /// Wait for the next sidecar connection.
    pub async fn accept(&mut self) -> KmsPeer {
        timeout(RECV_TIMEOUT, self.peers.recv())
            .await
            .expect("Timed out waiting for a sidecar connection")
            .expect("Mock KMS stopped accepting")
    }
}

impl Drop for MockKms {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The KMS side of one sidecar connection.
pub struct KmsPeer {
    ws: WebSocketStream<TcpStream>,
}

impl KmsPeer {
    /// Next JSON text frame, skipping control frames. `None` once the sidecar closed.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("Timed out waiting for a frame from the sidecar");
            match frame {
                Some(Ok(Message::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).expect("Sidecar sent JSON"));
                }
                Some(Ok(Message::Close(_))) => {
                    let _ = self.ws.flush().await;
                    return None;
                }
                None | Some(Err(_)) => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Next frame, which must be a request for `method`.
    pub async fn expect_request(&mut self, method: &str) -> Value {
        let request = self.recv().await.expect("Sidecar closed the connection");
        assert_eq!(request["jsonrpc"], json!("2.0"));
        assert_eq!(request["method"], json!(method), "unexpected frame {request}");
        request
    }

    /// True if nothing arrives within `wait`.
    pub async fn is_quiet_for(&mut self, wait: Duration) -> bool {
        loop {
            match timeout(wait, self.ws.next()).await {
                Err(_) => return true,
                Ok(Some(Ok(Message::Text(_)))) => return false,
                Ok(Some(Ok(_))) => continue,
                Ok(None) | Ok(Some(Err(_))) => return true,
            }
        }
    }

    pub async fn send(&mut self, value: Value) {
        self.ws
            .send(Message::text(value.to_string()))
            .await
            .expect("Failed to send to sidecar");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::text(text))
            .await
            .expect("Failed to send to sidecar");
    }

    pub async fn reply(&mut self, request: &Value, result: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }))
            .await;
    }

    pub async fn reply_error(&mut self, request: &Value, code: Value, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": { "id": code, "message": message },
        }))
        .await;
    }

    /// Answer `register` and `challenge` the way a healthy KMS does.
    ///
    /// Panics if the challenge signatures are not made with the issued keys.
    pub async fn complete_registration(&mut self) -> String {
        let register = self.expect_request("register").await;
        let sidecar_id = register["params"]["id"]
            .as_str()
            .expect("register carries the sidecar id")
            .to_string();
        self.reply(
            &register,
            json!({
                "id": sidecar_id,
                "rowKey": ROW_KEY,
                "batchKey": BATCH_KEY,
                "challenge": CHALLENGE,
            }),
        )
        .await;

        let challenge = self.expect_request("challenge").await;
        assert_challenge_signed(&challenge["params"]);
        self.reply(&challenge, json!({ "status": "OK" })).await;
        sidecar_id
    }

    /// Send a ping carrying `payload` and return the payload of the pong that answers it.
    pub async fn ping(&mut self, payload: &str) -> Vec<u8> {
        self.ws
            .send(Message::Ping(payload.as_bytes().to_vec().into()))
            .await
            .expect("Failed to ping sidecar");
        loop {
            let frame = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("Timed out waiting for a pong from the sidecar");
            match frame {
                Some(Ok(Message::Pong(data))) => return data.to_vec(),
                Some(Ok(_)) => continue,
                other => panic!("Connection ended before pong: {other:?}"),
            }
        }
    }

    /// Close the connection from the KMS side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Checks a `challenge` request's signatures against the issued keys.
pub fn assert_challenge_signed(params: &Value) {
    let row_signature = params["rowSignature"].as_str().expect("rowSignature present");
    let expected = symmetric::sign(CHALLENGE, ROW_KEY).expect("valid row key");
    assert_eq!(row_signature, expected, "row signature must be the CMAC of the challenge");

    let batch_signature = params["batchSignature"].as_str().expect("batchSignature present");
    assert!(
        verify_batch_signature(CHALLENGE, batch_signature),
        "batch signature must verify with the batch public key"
    );
}

/// Ed25519 verification with the public half of [`BATCH_KEY`].
pub fn verify_batch_signature(message: &str, signature_hex: &str) -> bool {
    let public = hex::decode(asymmetric::verifying_key(BATCH_KEY).expect("valid batch key"))
        .expect("hex public key");
    let public: [u8; 32] = public.try_into().expect("32-byte public key");
    let verifying = VerifyingKey::from_bytes(&public).expect("valid public key");

    let Ok(bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    verifying.verify_strict(message.as_bytes(), &signature).is_ok()
}

/// Connect to the event listener.
pub async fn connect_service(addr: SocketAddr) -> TcpStream {
    let addr = SocketAddr::from(([127, 0, 0, 1], addr.port()));
    TcpStream::connect(addr)
        .await
        .expect("Failed to connect to event listener")
}

/// Write one length-prefixed frame.
pub async fn send_frame(stream: &mut TcpStream, payload: &[u8]) {
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await.expect("Failed to write frame");
}
