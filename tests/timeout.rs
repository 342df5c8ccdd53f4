//! Receive timeout against an endpoint nobody is serving (`spec.md` §8
//! scenario 5).

use crate::common;
use karabo_bridge::{Client, ClientOptions, ClientPattern, KbError};
use std::time::Duration;

#[test]
fn three_consecutive_timeouts() {
    common::init_logging();
    // Nothing is bound here; REQ sockets queue the request locally and the
    // recv call is what actually times out.
    let endpoint = "tcp://127.0.0.1:59991";
    let mut client = Client::connect(
        &[endpoint],
        ClientOptions {
            pattern: ClientPattern::Req,
            timeout: Some(Duration::from_millis(200)),
        },
    )
    .unwrap();

    for _ in 0..3 {
        let err = client.next().unwrap_err();
        match &err {
            KbError::Timeout { endpoint: ep, after } => {
                assert_eq!(ep, endpoint);
                assert_eq!(after.as_millis(), 200);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        let rendered = err.to_string();
        assert!(rendered.contains("200 ms"));
        assert!(rendered.contains(endpoint));
    }
}
