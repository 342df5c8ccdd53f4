//! Integration tests exercising the wire codec and transport together over
//! real loopback TCP sockets.

mod common;
mod push_pull;
mod queue;
mod roundtrip;
mod timeout;
