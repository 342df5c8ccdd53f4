//! The dynamic value model for a train's property bags (`spec.md` §3, §9).
//!
//! The original implementation carries an untyped `dict` of `any -> any`,
//! dispatching on Python's runtime type at serialization time. Here that
//! becomes an explicit tagged union, with arrays kept separate from the
//! msgpack-encoded scalar/list/map content since the wire protocol carries
//! them in their own frames (`spec.md` §4.1).

use crate::error::KbError;
use crate::transport::frame::Frame;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// One property value within a source's property bag.
///
/// `Map` uses a `BTreeMap` rather than a `HashMap` so that re-encoding a
/// decoded bag is deterministic, which is what the round-trip and
/// version-detection tests in `spec.md` §8 rely on.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Array(NdArray),
}

impl Value {
    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// True for every variant except `Array` — used by the codec to split a
    /// property bag into its msgpack-able part and its array properties
    /// (`spec.md` §4.1).
    pub fn is_scalar_like(&self) -> bool {
        !matches!(self, Value::Array(_))
    }

    /// Coerces to `f64` for metadata fields that may round-trip through
    /// either an int or a float msgpack encoding depending on the producer.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }
}

/// Hand-written like `serde_json::Value`'s: the msgpack data model (nil
/// aside) maps directly onto our variants, so encoding just forwards to the
/// matching `Serializer` method.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut ser_map = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    ser_map.serialize_entry(k, v)?;
                }
                ser_map.end()
            }
            Value::Array(_) => Err(serde::ser::Error::custom(
                "array values are carried in their own wire frame and cannot be msgpack-serialized inline",
            )),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a msgpack scalar, list, or map")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::UInt(v))
    }

    fn visit_f32<E>(self, v: f32) -> Result<Value, E> {
        Ok(Value::Float(v as f64))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Str(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::Str(v))
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Bytes(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut out = BTreeMap::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            out.insert(k, v);
        }
        Ok(Value::Map(out))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// A contiguous, row-major, n-dimensional numeric array.
///
/// `data` aliases a region of exactly one received wire frame when decoded
/// (the zero-copy guarantee of `spec.md` §4.1); it is a freshly-owned buffer
/// when constructed by a producer before sending.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data: Frame,
}

impl NdArray {
    pub fn new(dtype: DType, shape: Vec<usize>, data: Frame) -> crate::error::Result<Self> {
        let arr = NdArray { dtype, shape, data };
        let expected_bytes = arr
            .element_count()
            .checked_mul(arr.dtype.size_of_element())
            .ok_or_else(|| KbError::Protocol("array shape overflows byte count".into()))?;
        if arr.data.as_ref().len() != expected_bytes {
            return Err(KbError::Protocol(format!(
                "array payload is {} bytes, expected {} for shape {:?} of dtype {}",
                arr.data.as_ref().len(),
                expected_bytes,
                arr.shape,
                arr.dtype.as_str()
            )));
        }
        Ok(arr)
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// The canonical set of numeric element types recognized on the wire
/// (`spec.md` §4.1). Endianness is native; cross-endian portability is
/// explicitly not required by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float16 => "float16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        }
    }

    /// Size, in bytes, of a single element. Used to validate a decoded
    /// array payload's length against its declared shape (`spec.md` §4.1's
    /// "Failure semantics" does not mention this explicitly, but a short
    /// buffer is a malformed array header by construction).
    pub fn size_of_element(&self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 | DType::Float16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 | DType::Complex64 => 8,
            DType::Complex128 => 16,
        }
    }

    pub fn from_str(s: &str) -> crate::error::Result<Self> {
        Ok(match s {
            "bool" => DType::Bool,
            "int8" => DType::Int8,
            "int16" => DType::Int16,
            "int32" => DType::Int32,
            "int64" => DType::Int64,
            "uint8" => DType::UInt8,
            "uint16" => DType::UInt16,
            "uint32" => DType::UInt32,
            "uint64" => DType::UInt64,
            "float16" => DType::Float16,
            "float32" => DType::Float32,
            "float64" => DType::Float64,
            "complex64" => DType::Complex64,
            "complex128" => DType::Complex128,
            other => return Err(KbError::Protocol(format!("unsupported dtype {other:?}"))),
        })
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
