//! Sender / Server (C4, `spec.md` §4.4): accepts `(data, meta)` pairs,
//! serializes them, and emits per the configured pattern. A bounded
//! internal queue decouples the producer from the network.

use crate::codec::{self, EncodeOptions, ProtocolVersion};
use crate::error::{KbError, Result};
use crate::train::{MetaBag, PropertyBag, SourceName, Train};
use crate::transport::{ServerPattern, Socket};
use crossbeam_channel::{Receiver, Sender as ChannelSender, TrySendError};
use std::collections::BTreeMap;
use std::time::Duration;
use zmq::PollEvents;

/// Configuration recognized by the sender/server (`spec.md` §6 table).
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub pattern: ServerPattern,
    pub protocol_version: ProtocolVersion,
    pub dummy_timestamps: bool,
    /// Feed queue capacity (`spec.md` §4.4, default 10).
    pub queue_len: usize,
    /// Socket-level high-water mark (`spec.md` §6, default 1).
    pub hwm: i32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            pattern: ServerPattern::Rep,
            protocol_version: ProtocolVersion::default(),
            dummy_timestamps: false,
            queue_len: 10,
            hwm: 1,
        }
    }
}

/// A bound server socket plus the bounded feed queue producers push trains
/// into (`spec.md` §4.4 "Bounded queue").
pub struct Sender {
    ctx: zmq::Context,
    socket: Socket,
    endpoint: String,
    pattern: ServerPattern,
    opts_for_encode: EncodeOptions,
    queue_tx: ChannelSender<Train>,
    queue_rx: Receiver<Train>,
}

/// Sent in place of a train when a `next <divisor> <remainder>` request's
/// partition doesn't admit the currently staged train (`spec.md` §4.4, §6).
/// Not specified by the original (it implements no server-side
/// partitioning); resolved here so the REQ/REP lock-step contract still
/// holds — exactly one reply per request — without ever handing a
/// non-admitted train to a client that asked not to receive it.
/// [`Client::next_with_partitioning`](crate::client::Client::next_with_partitioning)
/// recognizes this exact byte string and re-requests automatically instead
/// of attempting to decode it as a train.
pub const PARTITION_SKIP_REPLY: &[u8] = b"Error: train not in partition";

/// A request the REP path understood (`spec.md` §4.4, §6 "Command
/// surface").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Next,
    NextWithPartition { divisor: u64, remainder: u64 },
    Unrecognized(Vec<u8>),
}

impl ServerCommand {
    pub fn parse(raw: &[u8]) -> ServerCommand {
        let text = match std::str::from_utf8(raw) {
            Ok(s) => s,
            Err(_) => return ServerCommand::Unrecognized(raw.to_vec()),
        };
        let mut parts = text.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("next"), None, None, None) => ServerCommand::Next,
            (Some("next"), Some(div), Some(rem), None) => {
                match (div.parse::<u64>(), rem.parse::<u64>()) {
                    (Ok(divisor), Ok(remainder)) => ServerCommand::NextWithPartition { divisor, remainder },
                    _ => ServerCommand::Unrecognized(raw.to_vec()),
                }
            }
            _ => ServerCommand::Unrecognized(raw.to_vec()),
        }
    }

    /// Whether the train about to be sent satisfies this command's
    /// sharding predicate (`spec.md` §6: "emit if `train_id mod divisor ==
    /// remainder`"). `Next` always satisfies.
    pub fn admits(&self, train_id: u64) -> bool {
        match self {
            ServerCommand::Next => true,
            ServerCommand::NextWithPartition { divisor, remainder } => {
                *divisor != 0 && train_id % divisor == *remainder
            }
            ServerCommand::Unrecognized(_) => false,
        }
    }
}

impl Sender {
    pub fn bind(endpoint: &str, opts: ServerOptions) -> Result<Self> {
        let ctx = zmq::Context::new();
        let socket = Socket::bind(&ctx, opts.pattern.socket_type(), endpoint, opts.hwm)?;
        let bound_endpoint = socket.endpoint()?;
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(opts.queue_len.max(1));

        log::debug!("bound {:?} server at {bound_endpoint}", opts.pattern);

        Ok(Sender {
            ctx,
            socket,
            endpoint: bound_endpoint,
            pattern: opts.pattern,
            opts_for_encode: EncodeOptions {
                version: opts.protocol_version,
                dummy_timestamps: opts.dummy_timestamps,
            },
            queue_tx,
            queue_rx,
        })
    }

    /// The effective bind address, with `0.0.0.0` substituted for the
    /// host's own name (`spec.md` §4.4).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn context(&self) -> zmq::Context {
        self.ctx.clone()
    }

    pub(crate) fn queue_receiver(&self) -> Receiver<Train> {
        self.queue_rx.clone()
    }

    pub(crate) fn queue_sender(&self) -> ChannelSender<Train> {
        self.queue_tx.clone()
    }

    /// Enqueues a train for the background driver to consume (`spec.md`
    /// §4.4 `feed`). Non-blocking calls against a full queue fail with
    /// [`KbError::QueueFull`].
    pub fn feed(
        &self,
        data: BTreeMap<SourceName, PropertyBag>,
        meta: BTreeMap<SourceName, MetaBag>,
        block: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let train = Train::from_pair(data, meta);
        if !block {
            return self.queue_tx.try_send(train).map_err(|e| match e {
                TrySendError::Full(_) => KbError::QueueFull,
                TrySendError::Disconnected(_) => KbError::TransportClosed,
            });
        }
        match timeout {
            Some(t) => self
                .queue_tx
                .send_timeout(train, t)
                .map_err(|_| KbError::Timeout {
                    endpoint: self.endpoint.clone(),
                    after: t,
                }),
            None => self.queue_tx.send(train).map_err(|_| KbError::TransportClosed),
        }
    }

    /// Encodes and transmits one train immediately, bypassing the feed
    /// queue. For [`ServerPattern::Rep`] this polls for a `"next"` request
    /// first and replies with an error for anything else, returning without
    /// emitting (`spec.md` §4.4 "REP handshake").
    ///
    /// Returns `Ok(true)` ("done") if `stop` has become readable, signalling
    /// a cooperative shutdown request from the background driver (§4.5).
    pub fn send(&self, train: &Train, stop: Option<&Socket>) -> Result<bool> {
        if self.pattern.requires_handshake() {
            return self.send_rep(train, stop);
        }

        if let Some(stop) = stop {
            let mut items = [
                self.socket.as_poll_item(PollEvents::POLLOUT),
                stop.as_poll_item(PollEvents::POLLIN),
            ];
            zmq::poll(&mut items, -1)?;
            if items[1].is_readable() {
                return Ok(true);
            }
        }

        let frames = codec::serialize(train, self.opts_for_encode)?;
        self.socket.send_multipart(frames)?;
        Ok(false)
    }

    fn send_rep(&self, train: &Train, stop: Option<&Socket>) -> Result<bool> {
        loop {
            let mut items = match stop {
                Some(stop) => vec![
                    self.socket.as_poll_item(PollEvents::POLLIN),
                    stop.as_poll_item(PollEvents::POLLIN),
                ],
                None => vec![self.socket.as_poll_item(PollEvents::POLLIN)],
            };
            zmq::poll(&mut items, -1)?;
            if items.len() > 1 && items[1].is_readable() {
                return Ok(true);
            }
            if !items[0].is_readable() {
                continue;
            }

            let request = self.socket.recv_bytes(&self.endpoint, None)?;
            let command = ServerCommand::parse(&request);
            let train_id = train_id_of(train);

            match &command {
                ServerCommand::Unrecognized(payload) => {
                    let text = String::from_utf8_lossy(payload);
                    let reply = format!("Error: bad request {text}");
                    log::warn!("rejecting request: {reply}");
                    self.socket.send(reply.as_bytes())?;
                    return Ok(false);
                }
                cmd if !cmd.admits(train_id.unwrap_or(0)) => {
                    self.socket.send(PARTITION_SKIP_REPLY)?;
                    return Ok(false);
                }
                _ => {
                    let frames = codec::serialize(train, self.opts_for_encode)?;
                    self.socket.send_multipart(frames)?;
                    return Ok(false);
                }
            }
        }
    }
}

fn train_id_of(train: &Train) -> Option<u64> {
    train.meta.values().find_map(|m| m.timestamp_tid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_next_and_partitioned_next() {
        assert_eq!(ServerCommand::parse(b"next"), ServerCommand::Next);
        assert_eq!(
            ServerCommand::parse(b"next 4 1"),
            ServerCommand::NextWithPartition { divisor: 4, remainder: 1 }
        );
        assert!(matches!(
            ServerCommand::parse(b"garbage"),
            ServerCommand::Unrecognized(_)
        ));
    }

    #[test]
    fn partition_predicate() {
        let cmd = ServerCommand::NextWithPartition { divisor: 3, remainder: 1 };
        assert!(cmd.admits(10));
        assert!(!cmd.admits(9));
    }

    #[test]
    fn queue_full_then_drains() {
        let sender = Sender::bind(
            "tcp://127.0.0.1:*",
            ServerOptions {
                queue_len: 2,
                ..Default::default()
            },
        )
        .unwrap();

        sender.feed(BTreeMap::new(), BTreeMap::new(), false, None).unwrap();
        sender.feed(BTreeMap::new(), BTreeMap::new(), false, None).unwrap();
        let err = sender
            .feed(BTreeMap::new(), BTreeMap::new(), false, None)
            .unwrap_err();
        assert!(matches!(err, KbError::QueueFull));

        sender.queue_receiver().recv().unwrap();
        sender.feed(BTreeMap::new(), BTreeMap::new(), false, None).unwrap();
    }
}
