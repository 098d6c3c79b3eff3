use crate::crypto::{asymmetric, symmetric};
use crate::domain::{BatchService, BatchTracker, EventService};
use crate::error::domain::DomainError;
use crate::store::MemoryStore;

use common::RedactedKey;
use models::{BatchRow, EventId};

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ed25519_dalek::{Signature, VerifyingKey};
use uuid::Uuid;

const ROW_KEY: &str = "00112233445566778899aabbccddeeff";
const BATCH_SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

fn services() -> (Arc<MemoryStore>, EventService, BatchService) {
    let store = Arc::new(MemoryStore::new());
    let events = EventService::new(store.clone());
    let batches = BatchService::new(store.clone(), events.clone());
    (store, events, batches)
}

/// **VALUE**: Verifies the tracker releases exactly `batch_size` ids, oldest first.
///
/// **WHY THIS MATTERS**: Batches must cover events in the order they were sequenced, and a
/// batch must never be larger than configured.
///
/// **BUG THIS CATCHES**: Would catch releasing the newest ids or the whole backlog.
#[test]
fn given_batch_size_three_when_events_created_then_third_event_releases_fifo_batch() {
    // GIVEN: A tracker for batches of three
    let mut tracker = BatchTracker::new(3);
    let ids: Vec<EventId> = (0..4).map(|_| Uuid::new_v4()).collect();

    // WHEN: Recording events one by one
    let first = tracker.event_created(ids[0]);
    let second = tracker.event_created(ids[1]);
    let third = tracker.event_created(ids[2]);
    let fourth = tracker.event_created(ids[3]);

    // THEN: Only the third call releases a batch, in creation order
    assert_eq!(first, None);
    assert_eq!(second, None);
    assert_eq!(third, Some(ids[..3].to_vec()));
    assert_eq!(fourth, None);
    assert_eq!(tracker.pending_count(), 1);
}

/// **VALUE**: Verifies a zero batch size behaves as one instead of never batching.
///
/// **BUG THIS CATCHES**: Would catch `drain(..0)` returning empty batches forever.
#[test]
fn given_zero_batch_size_when_event_created_then_batches_every_event() {
    // GIVEN/WHEN: A tracker built with zero
    let mut tracker = BatchTracker::new(0);
    let id = Uuid::new_v4();

    // THEN: Every event is its own batch
    assert_eq!(tracker.batch_size(), 1);
    assert_eq!(tracker.event_created(id), Some(vec![id]));
}

/// **VALUE**: Verifies created events carry a row signature over their signable JSON.
///
/// **WHY THIS MATTERS**: The KMS audits individual rows with the row key; the signature
/// must cover exactly `{keyId, sequence, message, timestamp}`.
///
/// **BUG THIS CATCHES**: Would catch signing the raw message or a differently ordered object.
#[test]
fn given_message_when_event_created_then_signature_covers_signable_json() {
    // GIVEN: Event service and row key
    let (store, events, _) = services();
    let row_key = RedactedKey::new(ROW_KEY);

    // WHEN: Creating an event
    let event = events
        .create("sidecar-1", 1, r#"{"temp":72}"#, &row_key)
        .expect("event created");

    // THEN: Signature matches an independent signing of the signable form
    let signable = serde_json::to_string(&event.signable()).expect("serializable");
    assert_eq!(event.signature, symmetric::sign(&signable, ROW_KEY).expect("valid key"));
    assert_eq!(store.event_count().expect("store readable"), 1);
}

/// **VALUE**: Verifies a sequence number cannot be recorded twice for one sidecar.
///
/// **WHY THIS MATTERS**: Sequences let the KMS detect gaps and replays. A duplicate would
/// make two different rows claim the same position.
///
/// **BUG THIS CATCHES**: Would catch the uniqueness constraint being dropped from the store.
#[test]
fn given_recorded_sequence_when_created_again_then_returns_store_error() {
    // GIVEN: Sequence 1 already recorded
    let (_, events, _) = services();
    let row_key = RedactedKey::new(ROW_KEY);
    events.create("sidecar-1", 1, "a", &row_key).expect("event created");

    // WHEN: Recording sequence 1 again
    let result = events.create("sidecar-1", 1, "b", &row_key);

    // THEN: Rejected by the store
    assert!(matches!(result, Err(DomainError::Store(_))));
}

/// **VALUE**: Verifies batch creation signs the row payload and claims its events.
///
/// **WHY THIS MATTERS**: The batch signature is what the KMS verifies with the public
/// half of the batch key; claimed events must not be batched again.
///
/// **BUG THIS CATCHES**: Would catch signing something other than `data`, or events
/// staying unbatched after a batch was stored.
#[test]
fn given_unbatched_events_when_batch_created_then_data_is_signed_and_events_assigned() {
    // GIVEN: Three recorded events
    let (store, events, batches) = services();
    let row_key = RedactedKey::new(ROW_KEY);
    let batch_key = RedactedKey::new(BATCH_SEED);
    let ids: Vec<EventId> = (1..=3)
        .map(|sequence| {
            events
                .create("sidecar-1", sequence, &format!("m{sequence}"), &row_key)
                .expect("event created")
                .event_id
        })
        .collect();

    // WHEN: Creating a batch from them
    let batch = batches
        .create("sidecar-1", &ids, &batch_key)
        .expect("batch created");

    // THEN: Data lists the rows in order and the signature verifies
    let rows: Vec<BatchRow> = serde_json::from_str(&batch.data).expect("json rows");
    let sequences: Vec<u64> = rows.iter().map(|row| row.row.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    let public = hex::decode(asymmetric::verifying_key(BATCH_SEED).expect("valid seed"))
        .expect("hex public key");
    let public: [u8; 32] = public.try_into().expect("32-byte public key");
    let verifying = VerifyingKey::from_bytes(&public).expect("valid public key");
    let signature = Signature::from_slice(&hex::decode(&batch.signature).expect("hex signature"))
        .expect("64-byte signature");
    assert!(verifying.verify_strict(batch.data.as_bytes(), &signature).is_ok());

    // THEN: The events now belong to the batch
    assert!(events.get_unbatched_events_by_ids(&ids).expect("readable").is_empty());
    assert_eq!(store.batch_count().expect("store readable"), 1);

    // THEN: Batching them again finds nothing to do
    let again = batches.create("sidecar-1", &ids, &batch_key);
    assert!(matches!(again, Err(DomainError::EmptyBatch { .. })));
}

/// **VALUE**: Verifies timespan lookups for events and batches respect their bounds.
///
/// **WHY THIS MATTERS**: Inquiries from the KMS ask for batches inside a window; returning
/// batches outside it leaks data the KMS did not ask for.
///
/// **BUG THIS CATCHES**: Would catch swapped bounds or an ignored end time.
#[test]
fn given_records_when_querying_timespans_then_only_matching_ones_are_returned() {
    // GIVEN: One event batched now
    let (_, events, batches) = services();
    let row_key = RedactedKey::new(ROW_KEY);
    let batch_key = RedactedKey::new(BATCH_SEED);
    let before = SystemTime::now() - Duration::from_secs(60);
    let event = events.create("sidecar-1", 1, "m", &row_key).expect("event created");
    batches
        .create("sidecar-1", &[event.event_id], &batch_key)
        .expect("batch created");
    let after = SystemTime::now() + Duration::from_secs(60);

    // WHEN/THEN: A window around now finds them
    assert_eq!(
        events
            .get_event_count_in_timespan("sidecar-1", Some(before), Some(after))
            .expect("readable"),
        1
    );
    assert_eq!(batches.find_for_timespan(before, after).expect("readable").len(), 1);

    // WHEN/THEN: A window in the past, or another sidecar, finds nothing
    let long_ago = before - Duration::from_secs(3_600);
    assert!(batches.find_for_timespan(long_ago, before).expect("readable").is_empty());
    assert_eq!(
        events
            .get_event_count_in_timespan("sidecar-2", None, None)
            .expect("readable"),
        0
    );
}
