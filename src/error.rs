use std::time::Duration;
use thiserror::Error;

/// Error taxonomy for the Karabo Bridge wire protocol and transport.
///
/// All variants are surfaced to callers verbatim; the crate never retries or
/// reconnects on its own, and a failed call never partially mutates caller
/// state (a train is either fully decoded and returned, or not returned at
/// all).
#[derive(Error, Debug)]
pub enum KbError {
    /// Unsupported pattern, unsupported protocol version, unsupported
    /// serializer, or a malformed endpoint. Raised synchronously at
    /// construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unknown content tag, malformed header, odd frame count in v2.x, or a
    /// dtype outside the accepted set. Fatal for the affected train only;
    /// the connection itself remains usable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Receive deadline elapsed. Pending-request state is left intact by the
    /// caller so that a retry does not re-issue a request.
    #[error("timed out after {} ms waiting for {endpoint}", after.as_millis())]
    Timeout { endpoint: String, after: Duration },

    /// A non-blocking `feed()` call found the queue already at capacity.
    #[error("feed queue is full")]
    QueueFull,

    /// The underlying socket was destroyed, or the peer is unreachable.
    #[error("transport closed")]
    TransportClosed,

    #[error(transparent)]
    Zmq(#[from] zmq::Error),

    #[error(transparent)]
    Encode(#[from] rmp_serde::encode::Error),

    #[error(transparent)]
    Decode(#[from] rmp_serde::decode::Error),
}

pub type Result<T> = std::result::Result<T, KbError>;
