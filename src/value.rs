//! Storable values.
//!
//! [`Value`] is the unit every driver stores and returns. It mirrors what a
//! structured-clone capable store accepts: JSON-shaped data plus a family of
//! binary payloads ([`Binary`]) that keep their exact subtype through a
//! round trip, whichever backend holds them.

use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::errors::{KvError, KvResult};

/// A value that can be stored under a key.
///
/// `None`, `()` and an absent key all read back as [`Value::Null`].
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Binary(Binary),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Binary> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Convert to a JSON tree.
    ///
    /// Fails for binary payloads and non-finite floats, neither of which has
    /// a JSON representation.
    pub fn to_json(&self) -> KvResult<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    KvError::Serialization(format!("{f} cannot be represented as JSON"))
                })?,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<KvResult<_>>()?,
            ),
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<KvResult<_>>()?,
            ),
            Value::Binary(binary) => {
                return Err(KvError::Serialization(format!(
                    "nested {} payload cannot be represented as JSON",
                    binary.kind()
                )));
            }
        })
    }

    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Build a value from any serde-serializable type.
    pub fn from_serializable<T: Serialize>(value: &T) -> KvResult<Self> {
        Ok(Value::from_json(serde_json::to_value(value)?))
    }

    /// Deserialize this value into `T`.
    pub fn into_typed<T: DeserializeOwned>(self) -> KvResult<T> {
        Ok(serde_json::from_value(self.to_json()?)?)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl From<Binary> for Value {
    fn from(b: Binary) -> Self {
        Value::Binary(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

/// A blob: opaque bytes plus a MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct Blob {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(mime: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }
}

/// The exact subtype of a binary payload.
///
/// The serialized form of each kind is the 4-character tag used in
/// serialized envelopes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
pub enum BinaryKind {
    #[strum(serialize = "arbf")]
    ArrayBuffer,
    #[strum(serialize = "blob")]
    Blob,
    #[strum(serialize = "si08")]
    Int8Array,
    #[strum(serialize = "ui08")]
    Uint8Array,
    #[strum(serialize = "uic8")]
    Uint8ClampedArray,
    #[strum(serialize = "si16")]
    Int16Array,
    #[strum(serialize = "ur16")]
    Uint16Array,
    #[strum(serialize = "si32")]
    Int32Array,
    #[strum(serialize = "ui32")]
    Uint32Array,
    #[strum(serialize = "fl32")]
    Float32Array,
    #[strum(serialize = "fl64")]
    Float64Array,
}

impl BinaryKind {
    /// Width in bytes of one element.
    pub fn element_size(self) -> usize {
        match self {
            BinaryKind::ArrayBuffer
            | BinaryKind::Blob
            | BinaryKind::Int8Array
            | BinaryKind::Uint8Array
            | BinaryKind::Uint8ClampedArray => 1,
            BinaryKind::Int16Array | BinaryKind::Uint16Array => 2,
            BinaryKind::Int32Array | BinaryKind::Uint32Array | BinaryKind::Float32Array => 4,
            BinaryKind::Float64Array => 8,
        }
    }
}

/// Binary payloads. Typed arrays are laid out little-endian when flattened.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Binary {
    ArrayBuffer(Vec<u8>),
    Blob(Blob),
    Int8Array(Vec<i8>),
    Uint8Array(Vec<u8>),
    Uint8ClampedArray(Vec<u8>),
    Int16Array(Vec<i16>),
    Uint16Array(Vec<u16>),
    Int32Array(Vec<i32>),
    Uint32Array(Vec<u32>),
    Float32Array(Vec<f32>),
    Float64Array(Vec<f64>),
}

macro_rules! le_bytes {
    ($items:expr) => {
        $items.iter().flat_map(|x| x.to_le_bytes()).collect()
    };
}

macro_rules! from_le_chunks {
    ($bytes:expr, $ty:ty) => {
        $bytes
            .chunks_exact(std::mem::size_of::<$ty>())
            .map(|c| {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(c);
                <$ty>::from_le_bytes(buf)
            })
            .collect()
    };
}

impl Binary {
    pub fn kind(&self) -> BinaryKind {
        match self {
            Binary::ArrayBuffer(_) => BinaryKind::ArrayBuffer,
            Binary::Blob(_) => BinaryKind::Blob,
            Binary::Int8Array(_) => BinaryKind::Int8Array,
            Binary::Uint8Array(_) => BinaryKind::Uint8Array,
            Binary::Uint8ClampedArray(_) => BinaryKind::Uint8ClampedArray,
            Binary::Int16Array(_) => BinaryKind::Int16Array,
            Binary::Uint16Array(_) => BinaryKind::Uint16Array,
            Binary::Int32Array(_) => BinaryKind::Int32Array,
            Binary::Uint32Array(_) => BinaryKind::Uint32Array,
            Binary::Float32Array(_) => BinaryKind::Float32Array,
            Binary::Float64Array(_) => BinaryKind::Float64Array,
        }
    }

    /// The underlying buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Binary::ArrayBuffer(b) | Binary::Uint8Array(b) | Binary::Uint8ClampedArray(b) => {
                b.clone()
            }
            Binary::Blob(blob) => blob.bytes.clone(),
            Binary::Int8Array(v) => v.iter().map(|x| *x as u8).collect(),
            Binary::Int16Array(v) => le_bytes!(v),
            Binary::Uint16Array(v) => le_bytes!(v),
            Binary::Int32Array(v) => le_bytes!(v),
            Binary::Uint32Array(v) => le_bytes!(v),
            Binary::Float32Array(v) => le_bytes!(v),
            Binary::Float64Array(v) => le_bytes!(v),
        }
    }

    /// Wrap a raw buffer as `kind`.
    ///
    /// `mime` is only used for blobs. Fails when the buffer length is not a
    /// multiple of the element width.
    pub fn from_bytes(kind: BinaryKind, bytes: Vec<u8>, mime: &str) -> KvResult<Self> {
        if bytes.len() % kind.element_size() != 0 {
            return Err(KvError::Serialization(format!(
                "{} byte buffer is not a whole number of {} elements",
                bytes.len(),
                kind
            )));
        }
        Ok(match kind {
            BinaryKind::ArrayBuffer => Binary::ArrayBuffer(bytes),
            BinaryKind::Blob => Binary::Blob(Blob::new(mime, bytes)),
            BinaryKind::Int8Array => Binary::Int8Array(bytes.iter().map(|b| *b as i8).collect()),
            BinaryKind::Uint8Array => Binary::Uint8Array(bytes),
            BinaryKind::Uint8ClampedArray => Binary::Uint8ClampedArray(bytes),
            BinaryKind::Int16Array => Binary::Int16Array(from_le_chunks!(bytes, i16)),
            BinaryKind::Uint16Array => Binary::Uint16Array(from_le_chunks!(bytes, u16)),
            BinaryKind::Int32Array => Binary::Int32Array(from_le_chunks!(bytes, i32)),
            BinaryKind::Uint32Array => Binary::Uint32Array(from_le_chunks!(bytes, u32)),
            BinaryKind::Float32Array => Binary::Float32Array(from_le_chunks!(bytes, f32)),
            BinaryKind::Float64Array => Binary::Float64Array(from_le_chunks!(bytes, f64)),
        })
    }
}
