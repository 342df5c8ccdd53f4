//! Socket transport (C2, `spec.md` §4.2): pattern selection, endpoint
//! parsing, and the zero-copy frame type shared by the codec.

pub mod frame;
pub mod socket;

pub use frame::Frame;
pub use socket::Socket;

use crate::error::{KbError, Result};

/// Client-side socket patterns (`spec.md` §4.2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPattern {
    /// Lock-step request/reply: client sends `"next"` before each receive.
    Req,
    /// Broadcast subscription: no request, late joiners miss earlier trains.
    Sub,
    /// Balanced fan-in from one or more PUSH peers: no request.
    Pull,
    /// Multi-endpoint request/reply: one DEALER socket per endpoint, replies
    /// merged into a single train.
    Dealer,
}

impl ClientPattern {
    pub fn socket_type(&self) -> zmq::SocketType {
        match self {
            ClientPattern::Req => zmq::REQ,
            ClientPattern::Sub => zmq::SUB,
            ClientPattern::Pull => zmq::PULL,
            ClientPattern::Dealer => zmq::DEALER,
        }
    }

    /// Whether this pattern drives the server with a request line
    /// (`spec.md` §4.2 table, "Request required?" column).
    pub fn requires_request(&self) -> bool {
        matches!(self, ClientPattern::Req | ClientPattern::Dealer)
    }
}

/// Server-side socket patterns (`spec.md` §4.2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPattern {
    Rep,
    Pub,
    Push,
}

impl ServerPattern {
    pub fn socket_type(&self) -> zmq::SocketType {
        match self {
            ServerPattern::Rep => zmq::REP,
            ServerPattern::Pub => zmq::PUB,
            ServerPattern::Push => zmq::PUSH,
        }
    }

    /// Whether `send()` must wait for a `"next"` request before transmitting
    /// (`spec.md` §4.4).
    pub fn requires_handshake(&self) -> bool {
        matches!(self, ServerPattern::Rep)
    }
}

/// Validates endpoint syntax (`spec.md` §6).
///
/// Newer client/server code delegates validation to the transport itself
/// (`zmq::Socket::bind`/`connect` rejects malformed endpoints), matching
/// `spec.md`'s statement that only the legacy v1.0 client validated TCP
/// endpoints with a regex. [`validate_legacy_tcp`] keeps that historical
/// check available for callers that want to reproduce v1.0 behavior exactly.
pub fn validate_legacy_tcp(endpoint: &str) -> Result<()> {
    let is_tcp = endpoint.starts_with("tcp://");
    let port_ok = endpoint
        .rsplit_once(':')
        .map(|(_, port)| !port.is_empty() && port.len() <= 5 && port.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false);
    if is_tcp && port_ok {
        Ok(())
    } else {
        Err(KbError::Configuration(format!(
            "endpoint {endpoint:?} does not match tcp://<host>:<port>"
        )))
    }
}
