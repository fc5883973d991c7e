//! String envelopes for backends that can only hold text.
//!
//! Plain values are stored as JSON. Binary payloads are stored as
//! `__lfsc__:<tag><base64>`, where `<tag>` is the 4-character
//! [`BinaryKind`] code. Blobs additionally carry their MIME type right after
//! the tag: `__lfsc__:blob~~local_forage_type~<mime>~<base64>`.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::errors::{KvError, KvResult};
use crate::value::{Binary, BinaryKind, Value};

pub const SERIALIZED_MARKER: &str = "__lfsc__:";
pub const BLOB_TYPE_PREFIX: &str = "~~local_forage_type~";

const TAG_LENGTH: usize = 4;

/// Encode `value` as a string.
pub fn serialize(value: &Value) -> KvResult<String> {
    match value {
        Value::Binary(binary) => Ok(serialize_binary(binary)),
        other => Ok(serde_json::to_string(&other.to_json()?)?),
    }
}

fn serialize_binary(binary: &Binary) -> String {
    let kind = binary.kind();
    let encoded = STANDARD.encode(binary.to_bytes());
    match binary {
        Binary::Blob(blob) => format!(
            "{SERIALIZED_MARKER}{kind}{BLOB_TYPE_PREFIX}{}~{encoded}",
            blob.mime
        ),
        _ => format!("{SERIALIZED_MARKER}{kind}{encoded}"),
    }
}

/// Decode a string produced by [`serialize`].
///
/// An envelope whose tag is not a known [`BinaryKind`] is an
/// [`KvError::UnknownType`] error.
pub fn deserialize(raw: &str) -> KvResult<Value> {
    let Some(envelope) = raw.strip_prefix(SERIALIZED_MARKER) else {
        return Ok(Value::from_json(serde_json::from_str(raw)?));
    };

    let tag = envelope
        .get(..TAG_LENGTH)
        .ok_or_else(|| KvError::UnknownType(envelope.to_string()))?;
    let kind = BinaryKind::from_str(tag).map_err(|_| KvError::UnknownType(tag.to_string()))?;
    let mut payload = &envelope[TAG_LENGTH..];

    let mut mime = "";
    if kind == BinaryKind::Blob {
        // Envelopes written before blob types were recorded have no prefix.
        if let Some(rest) = payload.strip_prefix(BLOB_TYPE_PREFIX) {
            let (blob_type, data) = rest.split_once('~').ok_or_else(|| {
                KvError::Serialization("unterminated blob type in envelope".to_string())
            })?;
            mime = blob_type;
            payload = data;
        }
    }

    let bytes = STANDARD.decode(payload)?;
    Ok(Value::Binary(Binary::from_bytes(kind, bytes, mime)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Blob;
    use quickcheck::quickcheck;
    use std::collections::BTreeMap;

    #[test]
    fn plain_values_are_json() {
        assert_eq!(serialize(&Value::from("Initech")).unwrap(), "\"Initech\"");
        assert_eq!(serialize(&Value::Null).unwrap(), "null");
        assert_eq!(serialize(&Value::Int(42)).unwrap(), "42");
        assert_eq!(deserialize("[1,true,null]").unwrap(),
            Value::Array(vec![Value::Int(1), Value::Bool(true), Value::Null]));
    }

    #[test]
    fn binary_envelope_layout() {
        let raw = serialize(&Binary::Uint8Array(vec![1, 2, 3]).into()).unwrap();
        assert_eq!(raw, "__lfsc__:ui08AQID");
        let raw = serialize(&Binary::ArrayBuffer(vec![]).into()).unwrap();
        assert_eq!(raw, "__lfsc__:arbf");
    }

    #[test]
    fn blob_keeps_its_type() {
        let blob = Value::Binary(Binary::Blob(Blob::new("image/png", vec![0x89, 0x50])));
        let raw = serialize(&blob).unwrap();
        assert!(raw.starts_with("__lfsc__:blob~~local_forage_type~image/png~"));
        assert_eq!(deserialize(&raw).unwrap(), blob);
    }

    #[test]
    fn legacy_blob_without_type() {
        let value = deserialize("__lfsc__:blobAQI=").unwrap();
        assert_eq!(value, Value::Binary(Binary::Blob(Blob::new("", vec![1, 2]))));
    }

    #[test]
    fn unknown_tag_is_fatal() {
        match deserialize("__lfsc__:zz99AAAA") {
            Err(KvError::UnknownType(tag)) => assert_eq!(tag, "zz99"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn nested_object_round_trip() {
        let mut inner = BTreeMap::new();
        inner.insert("floor".to_string(), Value::Int(3));
        let mut outer = BTreeMap::new();
        outer.insert("office".to_string(), Value::from("Initech"));
        outer.insert("meta".to_string(), Value::Object(inner));
        outer.insert("ids".to_string(), Value::Array(vec![Value::Float(1.5)]));
        let value = Value::Object(outer);
        assert_eq!(deserialize(&serialize(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn string_that_looks_like_a_marker_is_still_json() {
        let value = Value::from("__lfsc__:arbf");
        let raw = serialize(&value).unwrap();
        assert_eq!(deserialize(&raw).unwrap(), value);
    }

    quickcheck! {
        fn int16_round_trip(items: Vec<i16>) -> bool {
            let value = Value::Binary(Binary::Int16Array(items));
            deserialize(&serialize(&value).unwrap()).unwrap() == value
        }

        fn uint32_round_trip(items: Vec<u32>) -> bool {
            let value = Value::Binary(Binary::Uint32Array(items));
            deserialize(&serialize(&value).unwrap()).unwrap() == value
        }

        fn float64_round_trip_bytes(items: Vec<f64>) -> bool {
            // NaN != NaN, so compare the buffers.
            let binary = Binary::Float64Array(items);
            match deserialize(&serialize(&Value::Binary(binary.clone())).unwrap()).unwrap() {
                Value::Binary(back) => back.kind() == binary.kind() && back.to_bytes() == binary.to_bytes(),
                _ => false,
            }
        }
    }
}
