//! Client/server implementation of the Karabo Bridge wire protocol: a
//! framed, multi-part message format for streaming per-train scientific
//! detector data (property bags plus n-dimensional arrays) over ZeroMQ.
//!
//! The crate is organized around the five components of the protocol:
//!
//! - [`value`] / [`train`] — the data model: the [`value::Value`] tagged
//!   union, [`value::NdArray`], and [`train::Train`].
//! - [`codec`] — the wire codec: encoding/decoding across protocol versions
//!   1.0, 2.1 and 2.2.
//! - [`transport`] — the socket transport: pattern selection, endpoint
//!   validation, and the zero-copy [`transport::Frame`] type.
//! - [`client`] — [`client::Client`], the consumer side.
//! - [`server`] — [`server::Sender`], the producer side.
//! - [`driver`] — [`driver::ServerHandle`], the background driver that runs
//!   a [`server::Sender`] on its own thread.

pub mod client;
pub mod codec;
pub mod driver;
pub mod error;
pub mod server;
pub mod train;
pub mod transport;
pub mod value;

pub use client::{Client, ClientOptions};
pub use codec::ProtocolVersion;
pub use driver::ServerHandle;
pub use error::{KbError, Result};
pub use server::{Sender, ServerOptions};
pub use train::{MetaBag, PropertyBag, SourceName, Train};
pub use transport::{ClientPattern, ServerPattern};
pub use value::{DType, NdArray, Value};
