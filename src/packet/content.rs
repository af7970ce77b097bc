//! Packet content buffer.
//!
//! Content keeps its allocation across pool cycles: [`Content::reset`] only
//! truncates the logical length.

use std::ops::Deref;

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::error::Result;

/// Growable byte buffer owned by a packet.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Content {
    buf: BytesMut,
}

impl Content {
    /// Create an empty content buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty content buffer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append bytes, returning the number written.
    #[inline]
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.buf.extend_from_slice(data);
        data.len()
    }

    /// Truncate to zero length, keeping capacity.
    #[inline]
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Append `value` encoded as MsgPack.
    pub fn encode_msgpack<T: Serialize>(&mut self, value: &T) -> Result<()> {
        MsgPackCodec::encode_into(&mut (&mut self.buf).writer(), value)
    }

    /// Decode the whole content as MsgPack.
    pub fn decode_msgpack<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.buf)
    }
}

impl Deref for Content {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl AsRef<[u8]> for Content {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl From<&[u8]> for Content {
    fn from(data: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(data),
        }
    }
}
