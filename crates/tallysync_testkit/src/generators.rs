//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random payloads that keep the
//! invariants the engine relies on: unique `(name, id)` pairs and live
//! bodies that are opaque bytes.

use proptest::prelude::*;
use tallysync_core::{EntityKeyData, EntityRecord, Timestamp};

use crate::fixtures::Transaction;

/// Strategy for generating valid entity ids.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,12}").expect("Invalid regex")
}

/// Strategy for generating valid entity names.
pub fn entity_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["account", "transaction", "budget", "split"]).prop_map(str::to_string)
}

/// Strategy for generating entity bodies (arbitrary bytes).
pub fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for generating one record: mostly live, sometimes a tombstone.
pub fn record_strategy() -> impl Strategy<Value = EntityRecord> {
    prop_oneof![
        4 => body_strategy().prop_map(EntityRecord::live),
        1 => (1u64..1_000_000).prop_map(|at| EntityRecord::tombstone(Timestamp::from_millis(at))),
    ]
}

/// Strategy for generating a list of `(name, id, record)` with unique keys.
pub fn records_strategy(max: usize) -> impl Strategy<Value = Vec<(String, String, EntityRecord)>> {
    prop::collection::btree_map(
        (entity_name_strategy(), entity_id_strategy()),
        record_strategy(),
        0..max,
    )
    .prop_map(|records| {
        records
            .into_iter()
            .map(|((name, id), record)| (name, id, record))
            .collect()
    })
}

/// Strategy for generating an entity key payload.
pub fn key_data_strategy(max: usize) -> impl Strategy<Value = EntityKeyData> {
    records_strategy(max).prop_map(|records| {
        let mut data = EntityKeyData::new();
        for (name, id, record) in records {
            data.insert_record(&name, &id, record);
        }
        data
    })
}

/// Strategy for generating valid transactions.
pub fn transaction_strategy() -> impl Strategy<Value = Transaction> {
    (
        entity_id_strategy(),
        prop::string::string_regex("acc-[0-9]{1,3}").expect("Invalid regex"),
        (-1_000_000i64..1_000_000).prop_filter("amount must not be zero", |amount| *amount != 0),
        prop::string::string_regex("[a-zA-Z ]{0,24}").expect("Invalid regex"),
    )
        .prop_map(|(id, account_id, amount, memo)| Transaction::with_id(id, account_id, amount).memo(memo))
}
