use crate::error::kms::KmsError;
use crate::kms::envelope::{self, Inbound, RpcError};

use serde_json::{Value, json};

/// **VALUE**: Verifies a KMS-initiated request is recognised with its id and params.
///
/// **WHY THIS MATTERS**: Health checks and inquiries are answered using the request id;
/// losing it means the KMS can never correlate the reply.
///
/// **BUG THIS CATCHES**: Would catch treating any envelope with an id as a response.
#[test]
fn given_healthcheck_request_when_parsed_then_returns_request_with_id_and_params() {
    // GIVEN: A healthcheck request from the KMS
    let text = r#"{"jsonrpc":"2.0","id":"x","method":"healthcheck","params":{"level":"ping"}}"#;

    // WHEN: Parsing
    let inbound = envelope::parse(text).expect("valid envelope");

    // THEN: It is a request carrying the original id
    assert_eq!(
        inbound,
        Inbound::Request {
            id: json!("x"),
            method: String::from("healthcheck"),
            params: json!({ "level": "ping" }),
        }
    );
}

/// **VALUE**: Verifies error responses keep the KMS code and message.
///
/// **WHY THIS MATTERS**: The KMS puts its error code in `error.id`; callers need it to tell
/// a rejected registration from a transient failure.
///
/// **BUG THIS CATCHES**: Would catch deserializing the standard `code` field instead of `id`.
#[test]
fn given_error_response_when_parsed_then_returns_rpc_error_with_code() {
    // GIVEN: An error response with a numeric correlation id
    let text = r#"{"jsonrpc":"2.0","id":7,"error":{"id":101,"message":"unknown sidecar"}}"#;

    // WHEN: Parsing
    let inbound = envelope::parse(text).expect("valid envelope");

    // THEN: The id is normalised to text and the error code survives
    assert_eq!(
        inbound,
        Inbound::Response {
            id: String::from("7"),
            outcome: Err(RpcError::new(101, "unknown sidecar")),
        }
    );
}

/// **VALUE**: Verifies envelopes without the `jsonrpc: "2.0"` marker are rejected.
///
/// **WHY THIS MATTERS**: Non-conforming traffic must be dropped with a warning rather than
/// dispatched as if it were valid.
///
/// **BUG THIS CATCHES**: Would catch the version check being lost or loosened.
#[test]
fn given_message_without_jsonrpc_marker_when_parsed_then_returns_envelope_error() {
    // GIVEN: Messages that are not JSON-RPC 2.0
    let inputs = [
        r#"{"id":"1","result":{}}"#,
        r#"{"jsonrpc":"1.0","id":"1","result":{}}"#,
        "not json at all",
        "[1,2,3]",
    ];

    for text in inputs {
        // WHEN: Parsing
        let result = envelope::parse(text);

        // THEN: Envelope error
        assert!(
            matches!(result, Err(KmsError::Envelope { .. })),
            "{text} should be rejected, got {result:?}"
        );
    }
}

/// **VALUE**: Verifies the outbound builders produce the exact KMS wire shapes.
///
/// **WHY THIS MATTERS**: The KMS matches on these fields; a missing `jsonrpc` or a renamed
/// error field breaks every reply.
///
/// **BUG THIS CATCHES**: Would catch notifications that carry an id or errors that use `code`.
#[test]
fn given_outbound_builders_when_called_then_produce_kms_wire_shapes() {
    // GIVEN: A request id from the KMS
    let id = json!("x");

    // WHEN: Building each kind of outbound envelope
    let request = envelope::request("r-1", "batch", json!({ "id": "b" }));
    let result = envelope::result(&id, json!({ "status": "OK" }));
    let error = envelope::error(&id, &RpcError::new("E1", "boom"));
    let notification = envelope::notification("inquiry-response", json!({ "total": 0 }));

    // THEN: Each matches the wire contract
    assert_eq!(
        request,
        json!({ "jsonrpc": "2.0", "id": "r-1", "method": "batch", "params": { "id": "b" } })
    );
    assert_eq!(
        result,
        json!({ "jsonrpc": "2.0", "id": "x", "result": { "status": "OK" } })
    );
    assert_eq!(
        error,
        json!({ "jsonrpc": "2.0", "id": "x", "error": { "id": "E1", "message": "boom" } })
    );
    assert_eq!(notification.get("id"), None::<&Value>);
}
