//! Dummy-timestamp generation (`spec.md` §4.1 "Dummy-timestamp policy").

use crate::train::MetaBag;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct DummyTimestamp {
    pub epoch: f64,
    pub sec: String,
    pub frac: String,
}

/// Generates a dummy timestamp from the local wall clock, matching the
/// original's `epoch = time(); sec, frac = str(epoch).split('.'); frac =
/// frac.ljust(18, '0')`: seconds with second resolution, and a fractional
/// part right-padded to 18 decimal digits (attosecond precision) even
/// though the system clock here only has nanosecond resolution.
pub fn generate() -> DummyTimestamp {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    let nanos = now.subsec_nanos();
    DummyTimestamp {
        epoch: secs as f64 + (nanos as f64) * 1e-9,
        sec: secs.to_string(),
        frac: format!("{nanos:09}000000000"),
    }
}

/// Fills `timestamp`, `timestamp.sec` and `timestamp.frac` from `dummy` if
/// `meta` has no existing timestamp. Never overwrites an existing one
/// (`spec.md` §4.1).
pub fn apply_if_absent(meta: &mut MetaBag, dummy: &DummyTimestamp) {
    if meta.has_timestamp() {
        return;
    }
    meta.timestamp = Some(dummy.epoch);
    meta.timestamp_sec = Some(dummy.sec.clone());
    meta.timestamp_frac = Some(dummy.frac.clone());
}
