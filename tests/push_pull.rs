//! PUSH/PULL exchange: no request byte ever needs to traverse the wire
//! (`spec.md` §8 scenario 6, §4.2 table).

use crate::common;
use karabo_bridge::codec::ProtocolVersion;
use karabo_bridge::server::ServerOptions;
use karabo_bridge::{Client, ClientOptions, ClientPattern, Sender, ServerPattern};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn push_pull_delivers_without_a_request() {
    common::init_logging();
    let sender = Arc::new(
        Sender::bind(
            "tcp://127.0.0.1:*",
            ServerOptions {
                pattern: ServerPattern::Push,
                protocol_version: ProtocolVersion::V2_2,
                dummy_timestamps: false,
                queue_len: 4,
                hwm: 1,
            },
        )
        .unwrap(),
    );
    let endpoint = sender.endpoint().to_string();

    let (data, meta) = common::scalar_train(10_000_000_000).into_pair();
    sender.feed(data, meta, true, None).unwrap();

    let driver = karabo_bridge::driver::spawn(sender).unwrap();

    let mut client = Client::connect(
        &[endpoint.as_str()],
        ClientOptions {
            pattern: ClientPattern::Pull,
            timeout: Some(Duration::from_secs(5)),
        },
    )
    .unwrap();

    let (data, meta) = client.next().unwrap();
    assert_eq!(
        meta["SPB_DET_AGIPD1M-1/DET/0CH0:xtdf"].timestamp_tid,
        Some(10_000_000_000)
    );
    assert_eq!(
        data["SPB_DET_AGIPD1M-1/DET/0CH0:xtdf"]["image.cellId"],
        karabo_bridge::Value::Int(10_000_000_000)
    );

    driver.join().unwrap();
}
