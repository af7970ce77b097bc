//! Frame encoding.
//!
//! [`encode_packet`] validates a packet and copies it into an
//! [`OutboundFrame`]: an encoded header plus a `Bytes` payload that can be
//! handed to the writer task while the caller reuses the packet.
//!
//! # Example
//!
//! ```
//! use framewire::packet::Packet;
//! use framewire::protocol::{build_frame, HEADER_SIZE};
//!
//! let mut packet = Packet::new();
//! packet.metadata.id = 64;
//! packet.set_content(b"hello");
//!
//! let bytes = build_frame(&packet).unwrap();
//! assert_eq!(bytes.len(), HEADER_SIZE + 5);
//! ```

use bytes::Bytes;

use super::wire_format::HEADER_SIZE;
use crate::error::{Error, Result};
use crate::packet::Packet;

/// A frame ready to be written to the stream.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded header (8 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Content bytes (can be empty).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Check the length invariant: `content_length` must match the content.
pub fn validate_packet(packet: &Packet) -> Result<()> {
    let actual = packet.content.len();
    if actual > u32::MAX as usize || packet.metadata.content_length as usize != actual {
        return Err(Error::Protocol(format!(
            "Content length {} does not match content size {}",
            packet.metadata.content_length, actual
        )));
    }
    Ok(())
}

/// Encode a packet into an owned frame (copies the content).
pub fn encode_packet(packet: &Packet) -> Result<OutboundFrame> {
    validate_packet(packet)?;
    Ok(OutboundFrame {
        header: packet.metadata.encode(),
        payload: Bytes::copy_from_slice(&packet.content),
    })
}

/// Encode a packet as a single contiguous buffer.
pub fn build_frame(packet: &Packet) -> Result<Vec<u8>> {
    validate_packet(packet)?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + packet.content.len());
    buf.extend_from_slice(&packet.metadata.encode());
    buf.extend_from_slice(&packet.content);
    Ok(buf)
}
