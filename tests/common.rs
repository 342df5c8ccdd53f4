//! Shared fixtures for the integration tests.

use karabo_bridge::{MetaBag, PropertyBag, Train, Value};
use std::sync::Once;

static LOG_INIT: Once = Once::new();

/// Initializes `env_logger` once per test binary so `RUST_LOG=debug` shows
/// the crate's connection/handshake/driver traces while debugging a failing
/// test. Safe to call from every test; only the first call takes effect.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// A train with one scalar-only source and a train ID in its metadata,
/// matching the "Iterator over REQ" scenario in `spec.md` §8.
pub fn scalar_train(train_id: u64) -> Train {
    let mut props = PropertyBag::new();
    props.insert("image.cellId".into(), Value::Int(train_id as i64));
    let mut meta = MetaBag::default();
    meta.timestamp_tid = Some(train_id);

    let mut train = Train::new();
    train.insert_source("SPB_DET_AGIPD1M-1/DET/0CH0:xtdf", props, meta);
    train
}
