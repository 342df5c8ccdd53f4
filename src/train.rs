//! The train data model (`spec.md` §3).

use crate::value::Value;
use std::collections::BTreeMap;

/// Opaque string identifying one logical data producer, e.g.
/// `"SPB_DET_AGIPD1M-1/DET/0CH0:xtdf"`.
pub type SourceName = String;

/// Mapping from dotted property path (e.g. `"image.cellId"`) to value.
/// Property paths are preserved verbatim, including dots — the codec never
/// splits `"a.b"` into nested maps (`spec.md` §3 invariant 3).
pub type PropertyBag = BTreeMap<String, Value>;

/// A source's metadata bag. All fields are optional: their presence on the
/// wire depends on protocol version and on whether the producer supplied
/// them (`spec.md` §3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaBag {
    /// Echo of the source name.
    pub source: Option<String>,
    /// Unix epoch seconds, sub-second precision.
    pub timestamp: Option<f64>,
    /// Integer seconds, as a decimal string.
    pub timestamp_sec: Option<String>,
    /// Fractional seconds, right-padded to 18 decimal digits (attosecond
    /// precision), as a decimal string.
    pub timestamp_frac: Option<String>,
    /// European XFEL train unique ID.
    pub timestamp_tid: Option<u64>,
}

impl MetaBag {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.timestamp.is_none()
            && self.timestamp_sec.is_none()
            && self.timestamp_frac.is_none()
            && self.timestamp_tid.is_none()
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Renders this bag as the flat `BTreeMap` the wire actually carries,
    /// either nested under a header's `metadata` key (v2.2, v1.0) or
    /// flattened into the payload with a `metadata.` prefix (v2.1).
    pub fn to_wire_map(&self) -> BTreeMap<String, Value> {
        let mut m = BTreeMap::new();
        if let Some(s) = &self.source {
            m.insert("source".to_string(), Value::Str(s.clone()));
        }
        if let Some(t) = self.timestamp {
            m.insert("timestamp".to_string(), Value::Float(t));
        }
        if let Some(s) = &self.timestamp_sec {
            m.insert("timestamp.sec".to_string(), Value::Str(s.clone()));
        }
        if let Some(s) = &self.timestamp_frac {
            m.insert("timestamp.frac".to_string(), Value::Str(s.clone()));
        }
        if let Some(tid) = self.timestamp_tid {
            m.insert("timestamp.tid".to_string(), Value::UInt(tid));
        }
        m
    }

    /// Parses a wire-format metadata map back into a `MetaBag`. Unrecognized
    /// keys are ignored for forward compatibility rather than rejected.
    pub fn from_wire_map(map: BTreeMap<String, Value>) -> MetaBag {
        let mut meta = MetaBag::default();
        for (k, v) in map {
            match k.as_str() {
                "source" => {
                    if let Value::Str(s) = v {
                        meta.source = Some(s);
                    }
                }
                "timestamp" => meta.timestamp = v.as_f64(),
                "timestamp.sec" => {
                    meta.timestamp_sec = match v {
                        Value::Str(s) => Some(s),
                        other => other.as_f64().map(|f| (f as i64).to_string()),
                    }
                }
                "timestamp.frac" => {
                    if let Value::Str(s) = v {
                        meta.timestamp_frac = Some(s);
                    }
                }
                "timestamp.tid" => meta.timestamp_tid = v.as_u64(),
                _ => {}
            }
        }
        meta
    }

    /// Merges `other`'s present fields over this bag's, preferring `other`
    /// where both carry a value (used when a v2.1 train carries both a
    /// header-less flattened form and, defensively, any header fields).
    pub fn merge(mut self, other: MetaBag) -> MetaBag {
        self.source = other.source.or(self.source);
        self.timestamp = other.timestamp.or(self.timestamp);
        self.timestamp_sec = other.timestamp_sec.or(self.timestamp_sec);
        self.timestamp_frac = other.timestamp_frac.or(self.timestamp_frac);
        self.timestamp_tid = other.timestamp_tid.or(self.timestamp_tid);
        self
    }
}

/// One snapshot delivered through the protocol: a mapping from source to
/// property bag, plus parallel metadata.
///
/// Invariant: after deserialization `data` and `meta` have identical key
/// sets (`spec.md` §3 invariant 1) — the decoder synthesizes an empty
/// [`MetaBag`] for any source that had none on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Train {
    pub data: BTreeMap<SourceName, PropertyBag>,
    pub meta: BTreeMap<SourceName, MetaBag>,
}

impl Train {
    pub fn new() -> Self {
        Train::default()
    }

    pub fn insert_source(&mut self, source: impl Into<SourceName>, props: PropertyBag, meta: MetaBag) {
        let source = source.into();
        self.data.insert(source.clone(), props);
        self.meta.insert(source, meta);
    }

    /// Splits the train into the `(data, meta)` pair the client's `next()`
    /// hands back to callers (`spec.md` §3, §4.3).
    pub fn into_pair(self) -> (BTreeMap<SourceName, PropertyBag>, BTreeMap<SourceName, MetaBag>) {
        (self.data, self.meta)
    }

    pub fn from_pair(
        data: BTreeMap<SourceName, PropertyBag>,
        meta: BTreeMap<SourceName, MetaBag>,
    ) -> Self {
        Train { data, meta }
    }
}
