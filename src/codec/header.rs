//! The wire header shape shared by every v2.x frame pair (`spec.md` §4.1
//! "Protocol v2.2").
//!
//! One struct models every header "content" kind — `msgpack`, `array`, and
//! the legacy `ImageData` — rather than a tagged enum, since `rmp-serde`
//! encodes enums as single-field maps and the wire format instead expects a
//! flat map with a plain `content` string. Fields that don't apply to a
//! given content kind are simply left `None` and omitted from the encoded
//! map.

use crate::error::Result;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireHeader {
    pub source: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    /// Extra scalar properties carried alongside a legacy `ImageData` array
    /// (`examples/original_source` `euxfel_karabo_bridge/client.py`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, Value>>,
}

/// Encodes a value as a msgpack map (struct fields by name, not by
/// position) — the representation every header and property bag uses.
pub fn pack_named<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.serialize(&mut rmp_serde::Serializer::new(&mut buf).with_struct_map())?;
    Ok(buf)
}

pub fn unpack<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}
