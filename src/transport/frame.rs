//! Zero-copy frame storage (`spec.md` §4.1 "Zero-copy guarantee", §9 "Array
//! sharing and lifetime").
//!
//! A [`Frame`] is a reference-counted handle on exactly one wire frame.
//! Cloning it bumps a refcount rather than copying bytes, so an [`NdArray`]
//! decoded from a multipart message can alias the frame it came from for as
//! long as any clone of it is alive — the receiving socket call owns the
//! first handle, array views hold further clones, and the backing
//! `zmq::Message` is only freed once the last of them is dropped.

use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Storage {
    Wire(Arc<zmq::Message>),
    Owned(Arc<Vec<u8>>),
}

/// A cheaply-clonable byte buffer, either borrowed zero-copy from a received
/// wire frame or owned by a producer ahead of sending.
#[derive(Debug, Clone)]
pub struct Frame(Storage);

impl Frame {
    /// Wrap a frame received off the wire without copying its bytes.
    pub fn from_message(msg: zmq::Message) -> Self {
        Frame(Storage::Wire(Arc::new(msg)))
    }

    /// Wrap a freshly-produced buffer, e.g. array data assembled by a
    /// producer before it has ever touched a socket.
    pub fn from_owned(data: Vec<u8>) -> Self {
        Frame(Storage::Owned(Arc::new(data)))
    }

    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        match &self.0 {
            Storage::Wire(msg) => msg,
            Storage::Owned(buf) => buf,
        }
    }
}

impl Deref for Frame {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame::from_owned(data)
    }
}
