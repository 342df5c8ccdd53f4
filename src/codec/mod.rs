//! Wire codec (C1, `spec.md` §4.1): encode/decode the multi-frame protocol
//! across versions 1.0, 2.1 and 2.2.
//!
//! Version detection happens only in [`deserialize`] and is purely
//! frame-count driven, per `spec.md`'s "Version negotiation": a multipart of
//! fewer than two frames is v1.0; otherwise frames are consumed in
//! `(header, payload)` pairs until exhausted, and a leftover odd frame is a
//! protocol error.

pub mod header;
pub mod timestamp;

use crate::error::{KbError, Result};
use crate::train::{MetaBag, PropertyBag, Train};
use crate::transport::Frame;
use crate::value::{DType, NdArray, Value};
use header::WireHeader;
use std::collections::BTreeMap;

/// The wire-format version controlling framing and metadata placement
/// (`spec.md` §6 `protocol_version` option).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1_0,
    V2_1,
    V2_2,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "1.0",
            ProtocolVersion::V2_1 => "2.1",
            ProtocolVersion::V2_2 => "2.2",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "1.0" => ProtocolVersion::V1_0,
            "2.1" => ProtocolVersion::V2_1,
            "2.2" => ProtocolVersion::V2_2,
            other => {
                return Err(KbError::Configuration(format!(
                    "unsupported protocol_version {other:?}"
                )))
            }
        })
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        ProtocolVersion::V2_2
    }
}

const CONTENT_MSGPACK: &str = "msgpack";
const CONTENT_ARRAY: &str = "array";
const CONTENT_IMAGEDATA: &str = "ImageData";
const METADATA_KEY: &str = "metadata";

/// If `true`, fill in `timestamp`/`timestamp.sec`/`timestamp.frac` from the
/// local wall clock whenever a source's metadata lacks a timestamp
/// (`spec.md` §4.1 "Dummy-timestamp policy"). Never overwrites an existing
/// value.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    pub version: ProtocolVersion,
    pub dummy_timestamps: bool,
}

/// Serializes a train into the ordered sequence of wire frames for the
/// configured protocol version. Sources are emitted in sorted order for
/// determinism (`spec.md` §4.1); `Train::data`/`Train::meta` are
/// `BTreeMap`s, so iteration is already sorted.
pub fn serialize(train: &Train, opts: EncodeOptions) -> Result<Vec<Vec<u8>>> {
    match opts.version {
        ProtocolVersion::V1_0 => serialize_v1(train, opts.dummy_timestamps),
        ProtocolVersion::V2_1 => serialize_v2(train, opts.dummy_timestamps, true),
        ProtocolVersion::V2_2 => serialize_v2(train, opts.dummy_timestamps, false),
    }
}

/// Deserializes a received multipart message into a train. The version is
/// detected from frame count alone (`spec.md` §4.1 "Version negotiation");
/// there is no in-band version tag.
pub fn deserialize(frames: Vec<Frame>) -> Result<Train> {
    if frames.len() < 2 {
        return deserialize_v1(frames);
    }
    if frames.len() % 2 != 0 {
        return Err(KbError::Protocol(format!(
            "odd frame count {} in v2.x multipart",
            frames.len()
        )));
    }
    deserialize_v2(frames)
}

fn dummy(meta: &mut MetaBag, dummy_timestamps: bool) {
    if dummy_timestamps {
        let ts = timestamp::generate();
        timestamp::apply_if_absent(meta, &ts);
    }
}

// ---------------------------------------------------------------------
// v1.0: single frame, metadata embedded under a `metadata` key inside the
// source's own property bag.
// ---------------------------------------------------------------------

fn serialize_v1(train: &Train, dummy_timestamps: bool) -> Result<Vec<Vec<u8>>> {
    let mut top = BTreeMap::new();
    for (source, props) in &train.data {
        let mut meta = train.meta.get(source).cloned().unwrap_or_default();
        dummy(&mut meta, dummy_timestamps);

        let mut bag = props.clone();
        // `spec.md` §9 Open Questions: this collides with any property
        // legitimately named `metadata`. The collision is preserved, not
        // renamed, matching the original.
        bag.insert(METADATA_KEY.to_string(), Value::Map(meta.to_wire_map()));
        top.insert(source.clone(), Value::Map(bag));
    }
    let payload = header::pack_named(&Value::Map(top))?;
    Ok(vec![payload])
}

fn deserialize_v1(mut frames: Vec<Frame>) -> Result<Train> {
    let frame = match frames.pop() {
        Some(f) => f,
        None => return Ok(Train::new()),
    };
    let top: Value = header::unpack(frame.as_ref())?;
    let top = match top {
        Value::Map(m) => m,
        _ => return Err(KbError::Protocol("v1.0 frame is not a map".into())),
    };

    let mut train = Train::new();
    for (source, value) in top {
        let mut bag = match value {
            Value::Map(m) => m,
            _ => return Err(KbError::Protocol(format!("source {source:?} is not a map"))),
        };
        let meta = match bag.remove(METADATA_KEY) {
            Some(Value::Map(m)) => MetaBag::from_wire_map(m),
            _ => MetaBag::default(),
        };
        train.insert_source(source, bag, meta);
    }
    Ok(train)
}

// ---------------------------------------------------------------------
// v2.1 / v2.2: per-source header+payload pairs, followed by per-array
// header+payload pairs. The only difference between the two is where
// metadata lives: v2.2 carries it on the msgpack header's `metadata` field,
// v2.1 flattens it into the payload as `metadata.<key>`.
// ---------------------------------------------------------------------

fn serialize_v2(train: &Train, dummy_timestamps: bool, flatten_metadata: bool) -> Result<Vec<Vec<u8>>> {
    let mut frames = Vec::new();

    for (source, props) in &train.data {
        let mut meta = train.meta.get(source).cloned().unwrap_or_default();
        dummy(&mut meta, dummy_timestamps);

        let mut scalar_bag = BTreeMap::new();
        let mut arrays: Vec<(String, NdArray)> = Vec::new();
        for (path, value) in props {
            if value.is_scalar_like() {
                scalar_bag.insert(path.clone(), value.clone());
            } else if let Value::Array(arr) = value {
                arrays.push((path.clone(), arr.clone()));
            }
        }

        let header = if flatten_metadata {
            for (k, v) in meta.to_wire_map() {
                scalar_bag.insert(format!("{METADATA_KEY}.{k}"), v);
            }
            WireHeader {
                source: source.clone(),
                content: CONTENT_MSGPACK.to_string(),
                ..Default::default()
            }
        } else {
            WireHeader {
                source: source.clone(),
                content: CONTENT_MSGPACK.to_string(),
                metadata: Some(meta.to_wire_map()),
                ..Default::default()
            }
        };

        frames.push(header::pack_named(&header)?);
        frames.push(header::pack_named(&Value::Map(scalar_bag))?);

        for (path, arr) in arrays {
            let array_header = WireHeader {
                source: source.clone(),
                content: CONTENT_ARRAY.to_string(),
                path: Some(path),
                dtype: Some(arr.dtype.as_str().to_string()),
                shape: Some(arr.shape.clone()),
                ..Default::default()
            };
            frames.push(header::pack_named(&array_header)?);
            frames.push(arr.data.as_ref().to_vec());
        }
    }

    Ok(frames)
}

fn deserialize_v2(frames: Vec<Frame>) -> Result<Train> {
    let mut train = Train::new();
    let mut iter = frames.into_iter();

    while let Some(header_frame) = iter.next() {
        let payload_frame = iter
            .next()
            .ok_or_else(|| KbError::Protocol("truncated header/payload pair".into()))?;

        let header: WireHeader = header::unpack(header_frame.as_ref())?;
        match header.content.as_str() {
            CONTENT_MSGPACK => {
                let value: Value = header::unpack(payload_frame.as_ref())?;
                let mut bag = match value {
                    Value::Map(m) => m,
                    _ => {
                        return Err(KbError::Protocol(format!(
                            "msgpack payload for source {:?} is not a map",
                            header.source
                        )))
                    }
                };

                let meta = if let Some(inline) = header.metadata {
                    MetaBag::from_wire_map(inline)
                } else {
                    extract_flattened_metadata(&mut bag)
                };

                merge_source(&mut train, header.source, bag, meta);
            }
            CONTENT_ARRAY | CONTENT_IMAGEDATA => {
                let path = header
                    .path
                    .ok_or_else(|| KbError::Protocol("array header missing path".into()))?;
                let dtype_str = header
                    .dtype
                    .ok_or_else(|| KbError::Protocol("array header missing dtype".into()))?;
                let shape = header
                    .shape
                    .ok_or_else(|| KbError::Protocol("array header missing shape".into()))?;
                let dtype = DType::from_str(&dtype_str)?;
                let arr = NdArray::new(dtype, shape, payload_frame)?;

                let entry = train.data.entry(header.source.clone()).or_default();
                entry.insert(path, Value::Array(arr));
                train.meta.entry(header.source).or_default();
            }
            other => {
                return Err(KbError::Protocol(format!("unknown content tag {other:?}")));
            }
        }
    }

    Ok(train)
}

fn extract_flattened_metadata(bag: &mut PropertyBag) -> MetaBag {
    let prefix = "metadata.";
    let keys: Vec<String> = bag
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect();
    let mut wire = BTreeMap::new();
    for key in keys {
        if let Some(value) = bag.remove(&key) {
            wire.insert(key[prefix.len()..].to_string(), value);
        }
    }
    MetaBag::from_wire_map(wire)
}

fn merge_source(train: &mut Train, source: String, bag: PropertyBag, meta: MetaBag) {
    train
        .data
        .entry(source.clone())
        .or_default()
        .extend(bag);
    let slot = train.meta.entry(source).or_default();
    *slot = std::mem::take(slot).merge(meta);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Frame;

    fn frames_of(bufs: Vec<Vec<u8>>) -> Vec<Frame> {
        bufs.into_iter().map(Frame::from_owned).collect()
    }

    #[test]
    fn scalar_only_round_trip_v2_2() {
        let mut train = Train::new();
        let mut bag = PropertyBag::new();
        bag.insert("a".into(), Value::Int(123));
        bag.insert("b".into(), Value::Float(1.23));
        bag.insert(
            "c".into(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        );
        bag.insert("d".into(), Value::Str("True".into()));
        bag.insert("e".into(), Value::Bool(false));
        train.insert_source("s1", bag.clone(), MetaBag::default());

        let opts = EncodeOptions {
            version: ProtocolVersion::V2_2,
            dummy_timestamps: false,
        };
        let wire = serialize(&train, opts).unwrap();
        assert_eq!(wire.len(), 2);

        let decoded = deserialize(frames_of(wire)).unwrap();
        assert_eq!(decoded.data.get("s1"), Some(&bag));
        assert_eq!(decoded.meta.get("s1"), Some(&MetaBag::default()));
    }

    #[test]
    fn array_source_round_trip_v2_2() {
        let mut train = Train::new();
        let mut bag = PropertyBag::new();
        let elems = 2 * 3 * 4;
        let data: Vec<u8> = (0..elems as u8).collect();
        let arr = NdArray::new(DType::UInt8, vec![2, 3, 4], Frame::from_owned(data)).unwrap();
        bag.insert("image.data".into(), Value::Array(arr.clone()));
        train.insert_source("X/Y/0", bag, MetaBag::default());

        let opts = EncodeOptions {
            version: ProtocolVersion::V2_2,
            dummy_timestamps: false,
        };
        let wire = serialize(&train, opts).unwrap();
        assert_eq!(wire.len(), 4);

        let decoded = deserialize(frames_of(wire)).unwrap();
        let decoded_arr = decoded.data["X/Y/0"]["image.data"].as_array().unwrap();
        assert_eq!(decoded_arr, &arr);
    }

    #[test]
    fn mixed_v1_metadata_recovered() {
        let mut train = Train::new();
        let mut bag = PropertyBag::new();
        bag.insert("x".into(), Value::Int(7));
        let mut meta = MetaBag::default();
        meta.timestamp_tid = Some(10_000_000_000);
        train.insert_source("s1", bag.clone(), meta.clone());

        let opts = EncodeOptions {
            version: ProtocolVersion::V1_0,
            dummy_timestamps: false,
        };
        let wire = serialize(&train, opts).unwrap();
        assert_eq!(wire.len(), 1);

        let decoded = deserialize(frames_of(wire)).unwrap();
        assert_eq!(decoded.data.get("s1"), Some(&bag));
        assert_eq!(decoded.meta.get("s1"), Some(&meta));
    }

    #[test]
    fn v2_1_flattens_metadata() {
        let mut train = Train::new();
        let mut meta = MetaBag::default();
        meta.timestamp_tid = Some(42);
        train.insert_source("s1", PropertyBag::new(), meta.clone());

        let opts = EncodeOptions {
            version: ProtocolVersion::V2_1,
            dummy_timestamps: false,
        };
        let wire = serialize(&train, opts).unwrap();
        let header: WireHeader = header::unpack(&wire[0]).unwrap();
        assert!(header.metadata.is_none());
        let payload: Value = header::unpack(&wire[1]).unwrap();
        match payload {
            Value::Map(m) => assert!(m.contains_key("metadata.timestamp.tid")),
            _ => panic!("expected map"),
        }

        let decoded = deserialize(frames_of(wire)).unwrap();
        assert_eq!(decoded.meta.get("s1"), Some(&meta));
    }

    #[test]
    fn version_detection_boundary() {
        let single = vec![header::pack_named(&Value::Map(BTreeMap::new())).unwrap()];
        assert!(deserialize(frames_of(single)).is_ok());

        let err = deserialize(frames_of(vec![vec![], vec![], vec![]])).unwrap_err();
        assert!(matches!(err, KbError::Protocol(_)));
    }

    #[test]
    fn dummy_timestamp_fills_absent_only() {
        let mut train = Train::new();
        let mut meta = MetaBag::default();
        meta.timestamp = Some(1700000000.5);
        train.insert_source("s1", PropertyBag::new(), meta.clone());
        train.insert_source("s2", PropertyBag::new(), MetaBag::default());

        let opts = EncodeOptions {
            version: ProtocolVersion::V2_2,
            dummy_timestamps: true,
        };
        let wire = serialize(&train, opts).unwrap();
        let decoded = deserialize(frames_of(wire)).unwrap();

        assert_eq!(decoded.meta["s1"].timestamp, Some(1700000000.5));
        assert!(decoded.meta["s2"].timestamp.is_some());
        assert!(decoded.meta["s2"].timestamp_sec.is_some());
        assert!(decoded.meta["s2"].timestamp_frac.is_some());
    }

    #[test]
    fn unknown_content_tag_is_protocol_error() {
        let header = WireHeader {
            source: "s1".into(),
            content: "bogus".into(),
            ..Default::default()
        };
        let wire = vec![header::pack_named(&header).unwrap(), vec![]];
        let err = deserialize(frames_of(wire)).unwrap_err();
        assert!(matches!(err, KbError::Protocol(_)));
    }
}
