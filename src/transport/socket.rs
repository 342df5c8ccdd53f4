//! Thin wrapper over the `zmq` crate's multipart, pattern-specific sockets
//! (`spec.md` §4.2).

use crate::error::{KbError, Result};
use crate::transport::frame::Frame;
use std::time::Duration;

/// A single ZeroMQ socket, bound or connected, with the high-water mark and
/// linger behavior `spec.md` §4.2 and §5 specify.
pub struct Socket {
    inner: zmq::Socket,
}

impl Socket {
    fn new(ctx: &zmq::Context, kind: zmq::SocketType, hwm: i32) -> Result<Self> {
        let inner = ctx.socket(kind)?;
        inner.set_linger(0)?;
        inner.set_rcvhwm(hwm)?;
        inner.set_sndhwm(hwm)?;
        Ok(Socket { inner })
    }

    pub fn bind(ctx: &zmq::Context, kind: zmq::SocketType, endpoint: &str, hwm: i32) -> Result<Self> {
        let sock = Self::new(ctx, kind, hwm)?;
        sock.inner.bind(endpoint)?;
        Ok(sock)
    }

    pub fn connect(ctx: &zmq::Context, kind: zmq::SocketType, endpoint: &str, hwm: i32) -> Result<Self> {
        let sock = Self::new(ctx, kind, hwm)?;
        sock.inner.connect(endpoint)?;
        Ok(sock)
    }

    pub fn subscribe_all(&self) -> Result<()> {
        self.inner.set_subscribe(b"")?;
        Ok(())
    }

    pub fn set_rcvtimeo(&self, timeout: Option<Duration>) -> Result<()> {
        let ms = timeout.map(|d| d.as_millis().min(i32::MAX as u128) as i32).unwrap_or(-1);
        self.inner.set_rcvtimeo(ms)?;
        Ok(())
    }

    /// The effective bind address, with `0.0.0.0` substituted for the
    /// host's own name (`spec.md` §4.4 `endpoint` property).
    pub fn endpoint(&self) -> Result<String> {
        let raw = self
            .inner
            .get_last_endpoint()?
            .map_err(|_| KbError::Protocol("last endpoint is not valid UTF-8".into()))?;
        let hostname = hostname();
        Ok(raw.replace("0.0.0.0", &hostname))
    }

    /// Sends a small non-multipart request (e.g. `"next"`).
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.inner.send(payload, 0)?;
        Ok(())
    }

    /// Sends one train as a multipart message, consuming ownership of each
    /// frame buffer into libzmq without copying.
    pub fn send_multipart(&self, frames: Vec<Vec<u8>>) -> Result<()> {
        self.inner.send_multipart(frames, 0)?;
        Ok(())
    }

    /// Receives a single, non-multipart frame as an owned buffer (used for
    /// short control messages such as request lines and error replies).
    pub fn recv_bytes(&self, endpoint_for_error: &str, timeout: Option<Duration>) -> Result<Vec<u8>> {
        match self.inner.recv_bytes(0) {
            Ok(b) => Ok(b),
            Err(zmq::Error::EAGAIN) => Err(timeout_error(endpoint_for_error, timeout)),
            Err(e) => Err(e.into()),
        }
    }

    /// Receives a full multipart message with zero-copy frame ownership
    /// (`spec.md` §4.1 "Zero-copy guarantee"). `recv_multipart` on the raw
    /// `zmq` socket would copy every frame into a fresh `Vec<u8>`; looping
    /// `recv_msg`/`get_rcvmore` instead keeps each frame's original
    /// zmq-owned buffer alive so array payloads can alias it.
    pub fn recv_multipart_zerocopy(
        &self,
        endpoint_for_error: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        loop {
            let msg = match self.inner.recv_msg(0) {
                Ok(m) => m,
                Err(zmq::Error::EAGAIN) => return Err(timeout_error(endpoint_for_error, timeout)),
                Err(e) => return Err(e.into()),
            };
            let more = self.inner.get_rcvmore()?;
            frames.push(Frame::from_message(msg));
            if !more {
                break;
            }
        }
        Ok(frames)
    }

    pub fn as_poll_item(&self, events: zmq::PollEvents) -> zmq::PollItem<'_> {
        self.inner.as_poll_item(events)
    }
}

fn timeout_error(endpoint: &str, timeout: Option<Duration>) -> KbError {
    KbError::Timeout {
        endpoint: endpoint.to_string(),
        after: timeout.unwrap_or_default(),
    }
}

fn hostname() -> String {
    // Mirrors the original's use of `socket.gethostname()`; falls back to a
    // fixed placeholder rather than failing `endpoint()` outright, since a
    // missing hostname should never prevent reporting a bind address.
    std::env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
