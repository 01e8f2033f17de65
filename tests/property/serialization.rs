//! Property-based tests for the wire and snapshot formats.
//!
//! Uses proptest to verify:
//! 1. Tags without the delimiter survive join → split unchanged.
//! 2. Split never yields empty or untrimmed tags, whatever the input.
//! 3. A record survives flatten → rebuild, apart from sub-millisecond time.
//! 4. Random bytes never cause a panic in `decode_snapshot`.
//! 5. Truncating a valid snapshot is always reported as an error.
//! 6. Whatever tags a user enters, a new record's tags come back
//!    unchanged from the ledger's delimited form.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, TimeZone, Utc};
use moneybook_proto::codec::{decode_snapshot, encode_snapshot};
use moneybook_proto::flat::{FlatRecord, join_tags, split_tags};
use moneybook_proto::record::{Record, RecordDraft, RecordId, SyncStatus};
use proptest::prelude::*;

// --- Strategies ---

/// A tag as a user would type it: no delimiter, no edge whitespace.
fn arb_tag() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]([a-zA-Z0-9 _-]{0,10}[a-zA-Z0-9_-])?"
}

/// Millisecond-precision timestamp between 2000 and 2100.
fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (946_684_800_000_i64..4_102_444_800_000_i64)
        .prop_map(|ms| Utc.timestamp_millis_opt(ms).single().unwrap())
}

fn arb_record() -> impl Strategy<Value = Record> {
    (
        "[a-z0-9-]{1,36}",
        ".{0,40}",
        -1.0e9_f64..1.0e9_f64,
        prop::collection::vec(arb_tag(), 0..6),
        prop::option::of(".{1,40}"),
        arb_timestamp(),
        arb_timestamp(),
    )
        .prop_map(|(id, name, amount, tags, description, created_at, updated_at)| Record {
            id: RecordId::from_string(id),
            name,
            amount,
            tags,
            description,
            created_at,
            updated_at,
            sync_status: SyncStatus::Pending,
        })
}

proptest! {
    #[test]
    fn tags_survive_join_and_split(tags in prop::collection::vec(arb_tag(), 0..8)) {
        prop_assert_eq!(split_tags(&join_tags(&tags)), tags);
    }

    #[test]
    fn split_yields_clean_tags(raw in ".{0,80}") {
        for tag in split_tags(&raw) {
            prop_assert!(!tag.is_empty());
            prop_assert_eq!(tag.trim(), tag.as_str());
            prop_assert!(!tag.contains(','));
        }
    }

    #[test]
    fn record_survives_flattening(record in arb_record()) {
        let rebuilt = FlatRecord::from_record(&record)
            .into_record(SyncStatus::Synced)
            .unwrap();
        prop_assert_eq!(&rebuilt.id, &record.id);
        prop_assert_eq!(&rebuilt.name, &record.name);
        prop_assert_eq!(&rebuilt.tags, &record.tags);
        prop_assert_eq!(&rebuilt.description, &record.description);
        prop_assert_eq!(rebuilt.created_at, record.created_at);
        prop_assert_eq!(rebuilt.updated_at, record.updated_at);
        prop_assert_eq!(rebuilt.amount.to_bits(), record.amount.to_bits());
        prop_assert_eq!(rebuilt.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode_snapshot::<Record>(&bytes);
    }

    #[test]
    fn truncated_snapshot_is_rejected(
        records in prop::collection::vec(arb_record(), 1..4),
        cut in 1usize..64,
    ) {
        let bytes = encode_snapshot(&records).unwrap();
        let keep = bytes.len().saturating_sub(cut);
        prop_assert!(decode_snapshot::<Record>(&bytes[..keep]).is_err());
    }

    #[test]
    fn entered_tags_survive_the_ledger(
        tags in prop::collection::vec(".{0,16}", 0..6),
        now in arb_timestamp(),
    ) {
        let draft = RecordDraft { tags, ..RecordDraft::new("entry", 1.0) };
        let record = Record::from_draft(draft, now);
        let rebuilt = FlatRecord::from_record(&record)
            .into_record(SyncStatus::Synced)
            .unwrap();
        prop_assert_eq!(rebuilt.tags, record.tags);
    }
}
