//! Codec module - typed payloads for packet content.
//!
//! The framing layer only moves opaque bytes. [`MsgPackCodec`] is the helper
//! used by [`Content`](crate::packet::Content) and router handlers that want
//! structured payloads.
//!
//! # Example
//!
//! ```
//! use framewire::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
