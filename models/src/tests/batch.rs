use crate::{Batch, BatchBuilder, BatchRow, EventBuilder, ModelError};

use std::time::{Duration, UNIX_EPOCH};

/// **VALUE**: Verifies batch data is a JSON array of `{row, signature}` in event order.
///
/// **WHY THIS MATTERS**: The batch signature covers this exact string. The KMS needs both the
/// signable row and the row signature to audit individual events inside a batch.
///
/// **BUG THIS CATCHES**: Would catch reordering of rows or a dropped row signature.
#[test]
fn given_events_when_building_batch_data_then_rows_keep_order_and_signatures() {
    // GIVEN: Two signed events
    let created = UNIX_EPOCH + Duration::from_secs(1_500_000_000);
    let events: Vec<_> = (1..=2)
        .map(|sequence| {
            EventBuilder::default()
                .with_sidecar_id("sidecar-1")
                .with_sequence(sequence)
                .with_message(format!("message-{sequence}"))
                .with_signature(format!("sig-{sequence}"))
                .with_created(created)
                .build()
                .expect("valid event")
        })
        .collect();

    // WHEN: Building batch data
    let data = Batch::build_data(&events).expect("serializable");

    // THEN: Rows decode back in order with their signatures
    let rows: Vec<BatchRow> = serde_json::from_str(&data).expect("json array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].row.sequence, 1);
    assert_eq!(rows[0].signature, "sig-1");
    assert_eq!(rows[1].row.message, "message-2");
    assert_eq!(rows[1].signature, "sig-2");
}

/// **VALUE**: Verifies builder validation rejects a batch with no events.
///
/// **WHY THIS MATTERS**: An empty batch would be signed and submitted to the KMS as a
/// meaningless record.
///
/// **BUG THIS CATCHES**: Would catch removal of the non-empty check.
#[test]
fn given_no_event_ids_when_building_batch_then_returns_validation_error() {
    // GIVEN: Builder without events
    let builder = BatchBuilder::default()
        .with_sidecar_id("sidecar-1")
        .with_data("[]")
        .with_signature("sig");

    // WHEN: Attempting to build
    let result = builder.build();

    // THEN: Should return validation error
    match result {
        Err(ModelError::Validation { message, .. }) => {
            assert_eq!(message, "A batch must contain at least one event");
        }
        other => panic!("Expected validation error, got {other:?}"),
    }
}
