//! Protocol module - wire format and framing.
//!
//! This module implements the frame codec:
//! - 8-byte metadata header encoding/decoding
//! - Packet to frame encoding
//! - Frame buffer for accumulating partial reads into pooled packets

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, encode_packet, validate_packet, OutboundFrame};
pub use frame_buffer::{FrameBuffer, DEFAULT_READ_BUFFER_SIZE};
pub use wire_format::{Metadata, DEFAULT_MAX_CONTENT_LENGTH, HEADER_SIZE};
