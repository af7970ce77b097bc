//! # framewire
//!
//! Asynchronous packet framing over byte streams.
//!
//! A [`Connection`] wraps any `AsyncRead + AsyncWrite` stream (TCP socket,
//! Unix socket, in-memory duplex) and exchanges discrete [`Packet`]s with the
//! peer, each carried in a length-prefixed frame.
//!
//! ## Architecture
//!
//! - **Frame codec**: 8-byte big-endian header (`id`, `operation`,
//!   `content_length`) followed by the content
//! - **Read task**: decodes frames into pooled packets and queues them in a
//!   bounded ring buffer
//! - **Write task**: drains an outgoing channel with batched vectored writes
//! - **Router / Client / Server**: optional operation dispatch over TCP
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use framewire::{Connection, Packet, Pool};
//!
//! #[tokio::main]
//! async fn main() -> framewire::Result<()> {
//!     let pool = Arc::new(Pool::new());
//!     let (left, right) = tokio::io::duplex(64 * 1024);
//!     let sender = Connection::new(left, pool.clone());
//!     let receiver = Connection::new(right, pool.clone());
//!
//!     let mut packet = pool.get();
//!     packet.metadata.id = 64;
//!     packet.metadata.operation = 32;
//!     packet.set_content(b"hello");
//!     sender.write_packet(&packet).await?;
//!     sender.flush().await?;
//!     pool.put(packet);
//!
//!     let received = receiver.read_packet().await?;
//!     assert_eq!(received.content.as_slice(), b"hello");
//!     pool.put(received);
//!
//!     sender.close().await?;
//!     receiver.close().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod packet;
pub mod protocol;
pub mod queue;
pub mod router;

mod client;
mod server;

pub use client::{Client, ClientBuilder};
pub use config::{ConnectionConfig, DEFAULT_CLOSE_TIMEOUT, DEFAULT_DEADLINE, DEFAULT_OUTGOING_CAPACITY};
pub use connection::{Connection, RawConn};
pub use error::{Error, Result};
pub use packet::{Content, Packet, Pool};
pub use protocol::{Metadata, DEFAULT_MAX_CONTENT_LENGTH, HEADER_SIZE};
pub use router::{Action, Handler, Outcome, Reply, Router};
pub use server::Server;
