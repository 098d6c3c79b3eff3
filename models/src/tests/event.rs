use crate::{EventBuilder, ModelError};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn valid_builder() -> EventBuilder {
    EventBuilder::default()
        .with_sidecar_id("sidecar-1")
        .with_sequence(1)
        .with_message(r#"{"temp":72}"#)
        .with_signature("abcdef")
}

/// **VALUE**: Verifies that builder validation rejects a zero sequence.
///
/// **WHY THIS MATTERS**: Sequences start at 1 and are part of the signed row. A zero would
/// mean the counter was never incremented and the row ordering the KMS checks is broken.
///
/// **BUG THIS CATCHES**: Would catch removal of the sequence lower bound.
#[test]
fn given_zero_sequence_when_building_event_then_returns_validation_error() {
    // GIVEN: Builder with sequence zero
    let builder = valid_builder().with_sequence(0);

    // WHEN: Attempting to build
    let result = builder.build();

    // THEN: Should return validation error
    match result {
        Err(ModelError::Validation { message, .. }) => {
            assert_eq!(message, "Sequence must start at 1");
        }
        other => panic!("Expected validation error, got {other:?}"),
    }
}

/// **VALUE**: Verifies that builder validation rejects a missing signature.
///
/// **WHY THIS MATTERS**: An unsigned event must never reach the store; batches embed
/// every row signature and the KMS verifies them.
///
/// **BUG THIS CATCHES**: Would catch the signature becoming optional during refactoring.
#[test]
fn given_missing_signature_when_building_event_then_returns_validation_error() {
    // GIVEN: Builder without signature
    let builder = EventBuilder::default()
        .with_sidecar_id("sidecar-1")
        .with_sequence(1)
        .with_message("hello");

    // WHEN: Attempting to build
    let result = builder.build();

    // THEN: Should return validation error
    match result {
        Err(ModelError::Validation { message, .. }) => {
            assert_eq!(message, "Signature is required");
        }
        other => panic!("Expected validation error, got {other:?}"),
    }
}

/// **VALUE**: Verifies the signable form uses the wire field names and ISO timestamps.
///
/// **WHY THIS MATTERS**: The signable JSON is what gets signed; the KMS recomputes it from
/// batch rows. Any drift in key names, order or timestamp format breaks verification.
///
/// **BUG THIS CATCHES**: Would catch a serde rename change or a switch to second precision.
#[test]
fn given_event_when_made_signable_then_serializes_key_id_sequence_message_timestamp() {
    // GIVEN: An event created at a fixed time
    let created = UNIX_EPOCH + Duration::from_millis(1_499_702_066_123);
    let event = valid_builder()
        .with_created(created)
        .build()
        .expect("valid event");

    // WHEN: Serializing the signable form
    let json = serde_json::to_string(&event.signable()).expect("serializable");

    // THEN: Field names, order and millisecond timestamp match the wire contract
    assert_eq!(
        json,
        r#"{"keyId":"sidecar-1","sequence":1,"message":"{\"temp\":72}","timestamp":"2017-07-10T15:54:26.123Z"}"#
    );
}

/// **VALUE**: Verifies a freshly built event is unbatched and gets a generated id.
///
/// **WHY THIS MATTERS**: The batch tracker relies on new events being unbatched; two events
/// sharing an id would collapse in the store.
///
/// **BUG THIS CATCHES**: Would catch a builder that reuses ids or pre-assigns a batch.
#[test]
fn given_two_built_events_when_compared_then_ids_differ_and_both_unbatched() {
    // GIVEN/WHEN: Two built events
    let first = valid_builder().build().expect("valid event");
    let second = valid_builder().with_created(SystemTime::now()).build().expect("valid event");

    // THEN: Distinct ids, no batch
    assert_ne!(first.event_id, second.event_id);
    assert!(!first.is_batched());
    assert!(!second.is_batched());
}
