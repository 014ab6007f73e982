//! Order-independent content fingerprint.

use crate::entity::{EntityKeyData, EntityRecord};
use sha2::{Digest, Sha256};

/// Domain separator, bumped if the digest layout ever changes.
const HASH_DOMAIN: &[u8] = b"tallysync/key-hash/v1";

const TAG_LIVE: u8 = 1;
const TAG_TOMBSTONE: u8 = 0;

/// Computes the fingerprint of a key's payload.
///
/// Each record is digested on its own with SHA-256 over
/// `(entity name, id, live/tombstone tag, body)`; the leading 64 bits of
/// every digest are summed with wrapping arithmetic, and the sum plus the
/// record count are digested once more. Addition commutes, so the result
/// does not depend on the order records were inserted or iterated in, and
/// it depends only on bytes, so every backend computes the same value.
///
/// Tombstone times are left out: two copies that agree on which entities
/// are deleted fingerprint equal even if they learnt of it at different times.
#[must_use]
pub fn compute_hash(data: &EntityKeyData) -> u64 {
    let mut sum = 0u64;
    let mut records = 0u64;

    for (name, id, record) in data.records() {
        sum = sum.wrapping_add(record_digest(name, id, record));
        records += 1;
    }

    let mut hasher = Sha256::new();
    hasher.update(HASH_DOMAIN);
    hasher.update(sum.to_le_bytes());
    hasher.update(records.to_le_bytes());
    leading_u64(&hasher.finalize())
}

fn record_digest(name: &str, id: &str, record: &EntityRecord) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update((name.len() as u64).to_le_bytes());
    hasher.update(name.as_bytes());
    hasher.update((id.len() as u64).to_le_bytes());
    hasher.update(id.as_bytes());
    match record {
        EntityRecord::Live { body } => {
            hasher.update([TAG_LIVE]);
            hasher.update((body.len() as u64).to_le_bytes());
            hasher.update(body);
        }
        EntityRecord::Tombstone { .. } => hasher.update([TAG_TOMBSTONE]),
    }
    leading_u64(&hasher.finalize())
}

fn leading_u64(digest: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
