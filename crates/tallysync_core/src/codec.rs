//! CBOR helpers for persisted blobs.
//!
//! Every blob the engine writes (key data, metadata, entity bodies) is CBOR
//! produced by `ciborium` from a serde type. Maps are `BTreeMap`s, so the
//! same value always serializes to the same bytes.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if the bytes are not a valid encoding of `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn roundtrip_map() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), 2u32);
        map.insert("a".to_string(), 1u32);

        let bytes = to_cbor(&map).unwrap();
        let decoded: BTreeMap<String, u32> = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn encoding_is_deterministic() {
        let mut first = BTreeMap::new();
        first.insert("x".to_string(), vec![1u8, 2]);
        first.insert("y".to_string(), vec![3u8]);

        let mut second = BTreeMap::new();
        second.insert("y".to_string(), vec![3u8]);
        second.insert("x".to_string(), vec![1u8, 2]);

        assert_eq!(to_cbor(&first).unwrap(), to_cbor(&second).unwrap());
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let result: CoreResult<BTreeMap<String, u32>> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CoreError::Codec { .. })));
    }
}
