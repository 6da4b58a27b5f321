//! Value encoding for the wire.
//!
//! Integers are stored as ASCII decimal so the backend can increment them
//! natively. Every other value is serialized with bincode behind a two-byte
//! header (`0x80`, version), which makes payloads self-describing: a codec
//! configured for one version still reads payloads written by another.

use crate::error::{Error, Result};
use bincode::Options;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// First byte of every serialized payload. Never the first byte of an ASCII integer.
const PAYLOAD_MARKER: u8 = 0x80;

/// A value stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// The integer meaning of this value, if it has one.
    ///
    /// Booleans count as 0 and 1. Floats have none.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Borrow the text content.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Serialization format version for non-integer values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CodecVersion {
    /// Fixed-width integer encoding.
    V1,
    /// Variable-width integer encoding.
    #[default]
    V2,
}

impl CodecVersion {
    /// The newest version.
    pub const fn latest() -> Self {
        CodecVersion::V2
    }

    /// Resolve a configured version number. `-1` selects the latest.
    pub fn from_option(raw: i64) -> Result<Self> {
        match raw {
            -1 => Ok(Self::latest()),
            1 => Ok(CodecVersion::V1),
            2 => Ok(CodecVersion::V2),
            other => Err(Error::Config(format!(
                "unsupported serializer version {}",
                other
            ))),
        }
    }

    fn tag(self) -> u8 {
        match self {
            CodecVersion::V1 => 1,
            CodecVersion::V2 => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(CodecVersion::V1),
            2 => Some(CodecVersion::V2),
            _ => None,
        }
    }

    fn serialize(self, value: &Value) -> bincode::Result<Vec<u8>> {
        match self {
            CodecVersion::V1 => bincode::DefaultOptions::new()
                .with_fixint_encoding()
                .serialize(value),
            CodecVersion::V2 => bincode::DefaultOptions::new().serialize(value),
        }
    }

    fn deserialize(self, body: &[u8]) -> bincode::Result<Value> {
        match self {
            CodecVersion::V1 => bincode::DefaultOptions::new()
                .with_fixint_encoding()
                .deserialize(body),
            CodecVersion::V2 => bincode::DefaultOptions::new().deserialize(body),
        }
    }
}

/// Encodes and decodes cache values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueCodec {
    version: CodecVersion,
}

impl ValueCodec {
    /// Create a codec that writes the given version.
    pub fn new(version: CodecVersion) -> Self {
        Self { version }
    }

    /// The version used for writes.
    pub fn version(&self) -> CodecVersion {
        self.version
    }

    /// Encode a value for the wire.
    pub fn encode(&self, value: &Value) -> Result<Bytes> {
        if let Value::Int(i) = value {
            return Ok(Bytes::from(i.to_string()));
        }

        let body = self
            .version
            .serialize(value)
            .map_err(|e| Error::Encode(e.to_string()))?;
        let mut out = Vec::with_capacity(body.len() + 2);
        out.push(PAYLOAD_MARKER);
        out.push(self.version.tag());
        out.extend_from_slice(&body);
        Ok(Bytes::from(out))
    }

    /// Decode stored bytes: integer first, serialized payload otherwise.
    pub fn decode(&self, raw: &[u8]) -> Result<Value> {
        if let Some(i) = parse_int(raw) {
            return Ok(Value::Int(i));
        }

        match raw {
            [PAYLOAD_MARKER, tag, body @ ..] => {
                let version = CodecVersion::from_tag(*tag).ok_or_else(|| {
                    Error::Decode(format!("unknown serializer version tag {}", tag))
                })?;
                Ok(version.deserialize(body)?)
            }
            _ => Err(Error::Decode(format!(
                "{} bytes are neither an integer nor a serialized payload",
                raw.len()
            ))),
        }
    }

    /// The codec version a stored payload was written with, if it is a payload.
    pub fn payload_version(raw: &[u8]) -> Option<CodecVersion> {
        match raw {
            [PAYLOAD_MARKER, tag, ..] => CodecVersion::from_tag(*tag),
            _ => None,
        }
    }
}

fn parse_int(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_pass_through() {
        let codec = ValueCodec::default();
        let encoded = codec.encode(&Value::Int(-42)).unwrap();
        assert_eq!(&encoded[..], b"-42");
        assert_eq!(codec.decode(&encoded).unwrap(), Value::Int(-42));
    }

    #[test]
    fn test_bool_is_serialized() {
        let codec = ValueCodec::default();
        let encoded = codec.encode(&Value::Bool(true)).unwrap();
        assert_eq!(encoded[0], PAYLOAD_MARKER);
        assert_eq!(codec.decode(&encoded).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_structured_round_trip() {
        let codec = ValueCodec::default();
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::from("alice"));
        map.insert("scores".to_string(), Value::List(vec![Value::Int(1), Value::Float(2.5)]));
        map.insert("blob".to_string(), Value::Bytes(vec![0, 159, 255]));
        let value = Value::Map(map);

        let encoded = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_numeric_text_stays_text() {
        let codec = ValueCodec::default();
        let encoded = codec.encode(&Value::from("12")).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), Value::from("12"));
    }

    #[test]
    fn test_versions_are_readable_across_codecs() {
        let v1 = ValueCodec::new(CodecVersion::V1);
        let v2 = ValueCodec::new(CodecVersion::V2);
        let value = Value::List(vec![Value::Int(300), Value::from("x")]);

        let old = v1.encode(&value).unwrap();
        let new = v2.encode(&value).unwrap();
        assert_ne!(old, new);
        assert_eq!(ValueCodec::payload_version(&old), Some(CodecVersion::V1));
        assert_eq!(v2.decode(&old).unwrap(), value);
        assert_eq!(v1.decode(&new).unwrap(), value);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let codec = ValueCodec::default();
        assert!(matches!(codec.decode(b"not a value"), Err(Error::Decode(_))));
        assert!(matches!(codec.decode(&[PAYLOAD_MARKER, 9, 1]), Err(Error::Decode(_))));
        assert!(matches!(codec.decode(&[PAYLOAD_MARKER, 2, 200]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_codec_version_option() {
        assert_eq!(CodecVersion::from_option(-1).unwrap(), CodecVersion::latest());
        assert_eq!(CodecVersion::from_option(1).unwrap(), CodecVersion::V1);
        assert!(CodecVersion::from_option(0).is_err());
    }
}
