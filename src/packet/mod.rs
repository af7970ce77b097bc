//! Packets and the packet pool.
//!
//! A [`Packet`] is the unit of I/O: fixed [`Metadata`] plus variable
//! [`Content`]. Packets are recycled through a [`Pool`] so steady-state
//! traffic does not allocate.

mod content;
mod pool;

pub use content::Content;
pub use pool::{Pool, DEFAULT_MAX_IDLE};

use serde::Serialize;

use crate::error::Result;
use crate::protocol::Metadata;

/// Metadata header plus content buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Packet {
    pub metadata: Metadata,
    pub content: Content,
}

impl Packet {
    /// Create an empty packet with zeroed metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the content with `data` and set `content_length` to match.
    pub fn set_content(&mut self, data: &[u8]) {
        self.content.reset();
        self.content.write(data);
        self.metadata.content_length = data.len() as u32;
    }

    /// Replace the content with `value` encoded as MsgPack and set
    /// `content_length` to match.
    pub fn set_msgpack<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.content.reset();
        self.content.encode_msgpack(value)?;
        self.metadata.content_length = self.content.len() as u32;
        Ok(())
    }

    /// Zero the metadata and truncate the content (capacity is kept).
    pub fn reset(&mut self) {
        self.metadata.reset();
        self.content.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_content_updates_length() {
        let mut packet = Packet::new();
        packet.set_content(b"first payload");
        packet.set_content(b"second");

        assert_eq!(packet.content.as_slice(), b"second");
        assert_eq!(packet.metadata.content_length, 6);
    }

    #[test]
    fn test_set_msgpack_updates_length() {
        let mut packet = Packet::new();
        packet.set_content(b"previous content that is longer");
        packet.set_msgpack(&("topic", 42u32)).unwrap();

        assert_eq!(packet.metadata.content_length as usize, packet.content.len());
        let decoded: (String, u32) = packet.content.decode_msgpack().unwrap();
        assert_eq!(decoded, ("topic".to_string(), 42));
        assert!(crate::protocol::encode_packet(&packet).is_ok());
    }

    #[test]
    fn test_reset() {
        let mut packet = Packet::new();
        packet.metadata.id = 64;
        packet.metadata.operation = 32;
        packet.set_content(&[1u8; 128]);

        packet.reset();

        assert_eq!(packet.metadata, Metadata::default());
        assert!(packet.content.is_empty());
        assert!(packet.content.capacity() >= 128);
    }
}
