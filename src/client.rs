//! Client (C3, `spec.md` §4.3): drives the transport, issues requests when
//! the pattern demands them, deserializes replies.

use crate::codec;
use crate::error::{KbError, Result};
use crate::train::{MetaBag, PropertyBag, SourceName, Train};
use crate::transport::{ClientPattern, Socket};
use std::collections::BTreeMap;
use std::time::Duration;

const NEXT: &[u8] = b"next";
/// Empty delimiter frame a DEALER socket must prepend to each request so
/// the peer REP/ROUTER socket sees a well-formed envelope (`spec.md` §4.2
/// "Multi-endpoint DEALER client").
const DELIMITER: &[u8] = b"";

/// Configuration recognized by the client (`spec.md` §6 table).
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub pattern: ClientPattern,
    pub timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            pattern: ClientPattern::Req,
            timeout: None,
        }
    }
}

/// A connected client. Not `Sync`: concurrent calls to `next()` on the same
/// instance are undefined by contract (`spec.md` §5), which the underlying
/// `zmq::Socket`'s own `!Sync` already enforces.
pub struct Client {
    _ctx: zmq::Context,
    pattern: ClientPattern,
    endpoints: Vec<String>,
    sockets: Vec<Socket>,
    timeout: Option<Duration>,
    /// `true` once a request has been sent and no reply has been received
    /// yet. Preserved across a timeout so a retry does not re-issue `"next"`
    /// and desynchronize REQ/REP (`spec.md` §4.3, §8 "Pending-request
    /// invariant").
    request_outstanding: bool,
}

impl Client {
    /// Connects to one or more endpoints. Multiple endpoints are only
    /// meaningful for [`ClientPattern::Dealer`] (`spec.md` §4.2
    /// "Multi-endpoint DEALER client"); other patterns use exactly one.
    pub fn connect(endpoints: &[impl AsRef<str>], opts: ClientOptions) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(KbError::Configuration("client requires at least one endpoint".into()));
        }
        if endpoints.len() > 1 && opts.pattern != ClientPattern::Dealer {
            return Err(KbError::Configuration(
                "only the DEALER pattern supports multiple endpoints".into(),
            ));
        }

        let ctx = zmq::Context::new();
        let mut sockets = Vec::with_capacity(endpoints.len());
        let mut owned_endpoints = Vec::with_capacity(endpoints.len());
        for ep in endpoints {
            let ep = ep.as_ref();
            let sock = Socket::connect(&ctx, opts.pattern.socket_type(), ep, 1)?;
            if opts.pattern == ClientPattern::Sub {
                sock.subscribe_all()?;
            }
            sock.set_rcvtimeo(opts.timeout)?;
            sockets.push(sock);
            owned_endpoints.push(ep.to_string());
        }

        log::debug!(
            "connected {:?} client to {:?}",
            opts.pattern,
            owned_endpoints
        );

        Ok(Client {
            _ctx: ctx,
            pattern: opts.pattern,
            endpoints: owned_endpoints,
            sockets,
            timeout: opts.timeout,
            request_outstanding: false,
        })
    }

    /// Connects the way the historical v1.0 client did: each endpoint is
    /// additionally checked against the legacy `^tcp://.*:\d{1,5}$` TCP
    /// regex before connecting (`spec.md` §6). Newer code should use
    /// [`Client::connect`], which delegates endpoint validation to `zmq`
    /// itself.
    pub fn connect_legacy_v1(endpoints: &[impl AsRef<str>], opts: ClientOptions) -> Result<Self> {
        for ep in endpoints {
            crate::transport::validate_legacy_tcp(ep.as_ref())?;
        }
        Self::connect(endpoints, opts)
    }

    /// Blocks until the next train is available and returns it as a
    /// `(data, meta)` pair (`spec.md` §4.3).
    pub fn next(&mut self) -> Result<(BTreeMap<SourceName, PropertyBag>, BTreeMap<SourceName, MetaBag>)> {
        self.next_with_request(None)
    }

    /// Like [`Client::next`], but for REQ/DEALER patterns lets the server
    /// shard trains among cooperating clients: the request line becomes
    /// `"next <divisor> <remainder>"` (`spec.md` §4.3).
    pub fn next_with_partitioning(
        &mut self,
        divisor: u64,
        remainder: u64,
    ) -> Result<(BTreeMap<SourceName, PropertyBag>, BTreeMap<SourceName, MetaBag>)> {
        self.next_with_request(Some((divisor, remainder)))
    }

    fn next_with_request(
        &mut self,
        partition: Option<(u64, u64)>,
    ) -> Result<(BTreeMap<SourceName, PropertyBag>, BTreeMap<SourceName, MetaBag>)> {
        let base = String::from_utf8_lossy(NEXT);
        let line = match partition {
            Some((div, rem)) => format!("{base} {div} {rem}"),
            None => base.into_owned(),
        };

        // A partitioned request whose divisor/remainder the currently
        // staged train doesn't satisfy gets the partition-skip sentinel
        // back instead of a train (`spec.md` §4.4's command surface is
        // under-specified here; `server::PARTITION_SKIP_REPLY` documents
        // the resolution). The reply still closes out the REQ/REP
        // lock-step, so `request_outstanding` clears and a fresh request is
        // sent for the next candidate train.
        loop {
            if self.pattern.requires_request() && !self.request_outstanding {
                self.send_request(line.as_bytes())?;
                self.request_outstanding = true;
            }

            if self.pattern == ClientPattern::Dealer {
                let train = self.recv_dealer_merged(line.as_bytes())?;
                self.request_outstanding = false;
                return Ok(train.into_pair());
            }

            let frames = self.sockets[0].recv_multipart_zerocopy(&self.endpoints[0], self.timeout)?;
            self.request_outstanding = false;
            if is_partition_skip_reply(&frames) {
                continue;
            }
            let train = codec::deserialize(frames)?;
            return Ok(train.into_pair());
        }
    }

    fn send_request(&self, line: &[u8]) -> Result<()> {
        match self.pattern {
            ClientPattern::Req => self.sockets[0].send(line),
            ClientPattern::Dealer => {
                for sock in &self.sockets {
                    sock.send_multipart(vec![DELIMITER.to_vec(), line.to_vec()])?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Sends one request per endpoint, receives one multipart reply per
    /// endpoint, strips the leading delimiter frame from each, and merges
    /// the decoded per-source maps into one train. No ordering is
    /// guaranteed across endpoints; source-name collisions across endpoints
    /// are the caller's responsibility (`spec.md` §4.2). An endpoint whose
    /// reply is the partition-skip sentinel is re-requested on its own
    /// until it replies with a train, independent of the other endpoints.
    fn recv_dealer_merged(&self, line: &[u8]) -> Result<Train> {
        let mut merged = Train::new();
        for (sock, endpoint) in self.sockets.iter().zip(self.endpoints.iter()) {
            loop {
                let mut frames = sock.recv_multipart_zerocopy(endpoint, self.timeout)?;
                if !frames.is_empty() {
                    frames.remove(0);
                }
                if is_partition_skip_reply(&frames) {
                    sock.send_multipart(vec![DELIMITER.to_vec(), line.to_vec()])?;
                    continue;
                }
                let train = codec::deserialize(frames)?;
                merged.data.extend(train.data);
                merged.meta.extend(train.meta);
                break;
            }
        }
        Ok(merged)
    }
}

/// True if `frames` is exactly the one-frame partition-skip reply a REP
/// server sends instead of a train (`crate::server::PARTITION_SKIP_REPLY`).
fn is_partition_skip_reply(frames: &[crate::transport::Frame]) -> bool {
    matches!(frames, [frame] if frame.as_ref() == crate::server::PARTITION_SKIP_REPLY)
}

impl Iterator for Client {
    type Item = Result<(BTreeMap<SourceName, PropertyBag>, BTreeMap<SourceName, MetaBag>)>;

    /// Iteration yields trains indefinitely by delegating to [`Client::next`]
    /// (`spec.md` §4.3 "Resource model"). A [`KbError::Timeout`] is yielded
    /// as `Some(Err(..))`, not treated as end-of-stream, so callers can
    /// retry within the loop.
    fn next(&mut self) -> Option<Self::Item> {
        Some(Client::next(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_multi_endpoint_for_non_dealer() {
        let err = Client::connect(
            &["inproc://a", "inproc://b"],
            ClientOptions {
                pattern: ClientPattern::Req,
                timeout: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, KbError::Configuration(_)));
    }

    #[test]
    fn rejects_empty_endpoint_list() {
        let empty: &[&str] = &[];
        let err = Client::connect(empty, ClientOptions::default()).unwrap_err();
        assert!(matches!(err, KbError::Configuration(_)));
    }

    #[test]
    fn legacy_v1_connect_rejects_non_tcp_endpoint() {
        let err = Client::connect_legacy_v1(&["ipc:///tmp/kb.sock"], ClientOptions::default())
            .unwrap_err();
        assert!(matches!(err, KbError::Configuration(_)));
    }
}
