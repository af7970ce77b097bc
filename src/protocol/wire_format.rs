//! Wire format encoding and decoding.
//!
//! Every frame starts with an 8-byte metadata header:
//! ```text
//! ┌──────────┬───────────┬────────────────┐
//! │ Id       │ Operation │ Content Length │
//! │ 2 bytes  │ 2 bytes   │ 4 bytes        │
//! │ uint16 BE│ uint16 BE │ uint32 BE      │
//! └──────────┴───────────┴────────────────┘
//! ```
//!
//! followed by exactly `content_length` content bytes. There is no sync marker:
//! the decoder relies on the stream preserving byte order.

use crate::error::{Error, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Default maximum content length accepted by the decoder (16 MiB).
pub const DEFAULT_MAX_CONTENT_LENGTH: u32 = 16 * 1024 * 1024;

/// Fixed-size packet header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// Caller-defined packet identifier.
    pub id: u16,
    /// Operation (message type) used for routing.
    pub operation: u16,
    /// Number of content bytes following the header.
    pub content_length: u32,
}

impl Metadata {
    /// Create new metadata.
    pub fn new(id: u16, operation: u16, content_length: u32) -> Self {
        Self {
            id,
            operation,
            content_length,
        }
    }

    /// Encode metadata to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use framewire::protocol::Metadata;
    ///
    /// let bytes = Metadata::new(64, 32, 512).encode();
    /// assert_eq!(bytes, [0, 64, 0, 32, 0, 0, 2, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode metadata into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.operation.to_be_bytes());
        buf[4..8].copy_from_slice(&self.content_length.to_be_bytes());
    }

    /// Decode metadata from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            id: u16::from_be_bytes([buf[0], buf[1]]),
            operation: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Reject content lengths above `max_content_length`.
    pub fn validate(&self, max_content_length: u32) -> Result<()> {
        if self.content_length > max_content_length {
            return Err(Error::Protocol(format!(
                "Content length {} exceeds maximum {}",
                self.content_length, max_content_length
            )));
        }
        Ok(())
    }

    /// Zero every field.
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
