//! Queue-full property (`spec.md` §8 "Queue-full property"): after `N`
//! successful non-blocking `feed()` calls against a queue of capacity `N`,
//! the `N+1`-th raises `QueueFull`; after one consumer step, the next
//! `feed` succeeds.

use crate::common;
use karabo_bridge::codec::ProtocolVersion;
use karabo_bridge::server::ServerOptions;
use karabo_bridge::{KbError, Sender, ServerPattern};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn queue_full_then_drains_via_driver() {
    common::init_logging();
    let sender = Arc::new(
        Sender::bind(
            "tcp://127.0.0.1:*",
            ServerOptions {
                pattern: ServerPattern::Push,
                protocol_version: ProtocolVersion::V2_2,
                dummy_timestamps: false,
                queue_len: 1,
                hwm: 1,
            },
        )
        .unwrap(),
    );

    let (data, meta) = common::scalar_train(1).into_pair();
    sender.feed(data, meta, false, None).unwrap();

    let (data, meta) = common::scalar_train(2).into_pair();
    let err = sender.feed(data, meta, false, None).unwrap_err();
    assert!(matches!(err, KbError::QueueFull));

    let driver = karabo_bridge::driver::spawn(sender.clone()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let (data, meta) = common::scalar_train(3).into_pair();
        match sender.feed(data, meta, false, None) {
            Ok(()) => break,
            Err(KbError::QueueFull) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    driver.join().unwrap();
}
