//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` as the read buffer and a two-state machine:
//! - `WaitingForHeader`: need at least 8 bytes
//! - `WaitingForContent`: header parsed, need `content_length` more bytes
//!
//! Complete frames are copied into packets taken from a [`Pool`], so the
//! content allocation is the pooled one rather than a fresh buffer per frame.

use bytes::{Buf, Bytes, BytesMut};

use super::wire_format::{Metadata, DEFAULT_MAX_CONTENT_LENGTH, HEADER_SIZE};
use crate::error::Result;
use crate::packet::{Packet, Pool};

/// Default read buffer capacity (64KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForHeader,
    WaitingForContent(Metadata),
}

/// Buffer for accumulating incoming bytes and extracting complete packets.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_content_length: u32,
}

impl FrameBuffer {
    /// Create a frame buffer with default capacity and content limit.
    pub fn new() -> Self {
        Self::with_capacity_and_max_content(DEFAULT_READ_BUFFER_SIZE, DEFAULT_MAX_CONTENT_LENGTH)
    }

    /// Create a frame buffer with custom capacity and content limit.
    pub fn with_capacity_and_max_content(capacity: usize, max_content_length: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::WaitingForHeader,
            max_content_length,
        }
    }

    /// Append bytes received from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Mutable access to the read buffer, for `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Try to decode one packet.
    ///
    /// Returns:
    /// - `Ok(Some(packet))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(Protocol)` if the declared content length exceeds the limit
    pub fn try_decode(&mut self, pool: &Pool) -> Result<Option<Packet>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let Some(metadata) = Metadata::decode(&self.buffer) else {
                        return Ok(None);
                    };
                    metadata.validate(self.max_content_length)?;

                    self.buffer.advance(HEADER_SIZE);
                    self.state = State::WaitingForContent(metadata);
                }
                State::WaitingForContent(metadata) => {
                    let length = metadata.content_length as usize;
                    if self.buffer.len() < length {
                        // Reserve once so the rest of the content lands without regrowing.
                        self.buffer.reserve(length - self.buffer.len());
                        return Ok(None);
                    }

                    let mut packet = pool.get();
                    packet.metadata = metadata;
                    packet.content.write(&self.buffer[..length]);
                    self.buffer.advance(length);

                    self.state = State::WaitingForHeader;
                    return Ok(Some(packet));
                }
            }
        }
    }

    /// Decode every complete packet currently buffered.
    pub fn push(&mut self, data: &[u8], pool: &Pool) -> Result<Vec<Packet>> {
        self.extend(data);

        let mut packets = Vec::new();
        while let Some(packet) = self.try_decode(pool)? {
            packets.push(packet);
        }
        Ok(packets)
    }

    /// Number of buffered bytes not yet returned as packets.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Give up on framing and return every unconsumed byte.
    ///
    /// A header already parsed for a partial frame is re-encoded in front of
    /// the remaining content so no stream bytes are lost.
    pub fn into_remaining(self) -> Bytes {
        match self.state {
            State::WaitingForHeader => self.buffer.freeze(),
            State::WaitingForContent(metadata) => {
                let mut out = BytesMut::with_capacity(HEADER_SIZE + self.buffer.len());
                out.extend_from_slice(&metadata.encode());
                out.extend_from_slice(&self.buffer);
                out.freeze()
            }
        }
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForContent(_) => "WaitingForContent",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
