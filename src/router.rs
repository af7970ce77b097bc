//! Operation router.
//!
//! A [`Router`] maps the 16-bit `operation` field of incoming packets to
//! handlers and drives a [`Connection`] with [`Router::serve`]: read a packet,
//! dispatch it, write the reply if there is one.
//!
//! # Example
//!
//! ```
//! use framewire::router::{Outcome, Reply, Router};
//!
//! const ECHO: u16 = 1;
//!
//! let mut router = Router::new();
//! router.route(ECHO, |meta: &framewire::Metadata, content: &[u8]| {
//!     Outcome::reply(Reply::new(meta.id, meta.operation, content.to_vec()))
//! });
//! assert!(router.contains(ECHO));
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::MsgPackCodec;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::protocol::Metadata;

/// What the serve loop does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    Continue,
    /// Flush pending replies and close the connection.
    Close,
}

/// Packet to send back to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub id: u16,
    pub operation: u16,
    pub content: Bytes,
}

impl Reply {
    pub fn new(id: u16, operation: u16, content: impl Into<Bytes>) -> Self {
        Self {
            id,
            operation,
            content: content.into(),
        }
    }

    /// Reply whose content is `value` encoded as MsgPack.
    pub fn msgpack<T: Serialize>(id: u16, operation: u16, value: &T) -> Result<Self> {
        Ok(Self::new(id, operation, MsgPackCodec::encode(value)?))
    }
}

/// Result of handling one packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub reply: Option<Reply>,
    pub action: Action,
}

impl Outcome {
    /// No reply, keep serving.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn reply(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            action: Action::Continue,
        }
    }

    /// No reply, close the connection.
    pub fn close() -> Self {
        Self {
            reply: None,
            action: Action::Close,
        }
    }

    /// Send `reply`, then close the connection.
    pub fn reply_and_close(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            action: Action::Close,
        }
    }
}

/// Packet handler.
///
/// Implemented for every `Fn(&Metadata, &[u8]) -> Outcome` closure.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, metadata: &Metadata, content: &[u8]) -> Result<Outcome>;
}

impl<F> Handler for F
where
    F: Fn(&Metadata, &[u8]) -> Outcome + Send + Sync + 'static,
{
    fn handle(&self, metadata: &Metadata, content: &[u8]) -> Result<Outcome> {
        Ok(self(metadata, content))
    }
}

/// Handler that decodes MsgPack content before calling the closure.
pub struct TypedHandler<F, T> {
    handler: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TypedHandler<F, T>
where
    F: Fn(&Metadata, T) -> Outcome + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> Handler for TypedHandler<F, T>
where
    F: Fn(&Metadata, T) -> Outcome + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    fn handle(&self, metadata: &Metadata, content: &[u8]) -> Result<Outcome> {
        let value: T = MsgPackCodec::decode(content)?;
        Ok((self.handler)(metadata, value))
    }
}

/// Dispatch table from operation to handler.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<u16, Box<dyn Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `operation`, replacing any previous one.
    pub fn route<H: Handler>(&mut self, operation: u16, handler: H) -> &mut Self {
        if self.handlers.insert(operation, Box::new(handler)).is_some() {
            tracing::debug!("Replaced handler for operation {}", operation);
        }
        self
    }

    /// Register a handler receiving MsgPack-decoded content.
    pub fn route_typed<T, F>(&mut self, operation: u16, handler: F) -> &mut Self
    where
        F: Fn(&Metadata, T) -> Outcome + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.route(operation, TypedHandler::new(handler))
    }

    pub fn contains(&self, operation: u16) -> bool {
        self.handlers.contains_key(&operation)
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for the packet's operation.
    pub fn dispatch(&self, packet: &Packet) -> Result<Outcome> {
        let operation = packet.metadata.operation;
        let handler = self
            .handlers
            .get(&operation)
            .ok_or(Error::HandlerNotFound(operation))?;
        handler.handle(&packet.metadata, &packet.content)
    }

    /// Serve `conn` until it closes.
    ///
    /// Packets with no handler, or whose handler fails, are logged and
    /// skipped. Returns `Ok` when the connection is closed (by either side or
    /// by an [`Action::Close`]); other connection faults are returned.
    pub async fn serve<S>(&self, conn: &Connection<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        tracing::debug!("Router serving {} operations", self.handlers.len());

        let result = self.serve_inner(conn).await;
        match result {
            Err(Error::ConnectionClosed) => Ok(()),
            other => other,
        }
    }

    async fn serve_inner<S>(&self, conn: &Connection<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let packet = conn.read_packet().await?;
            let dispatched = self.dispatch(&packet);
            conn.pool().put(packet);

            let outcome = match dispatched {
                Ok(outcome) => outcome,
                Err(Error::HandlerNotFound(operation)) => {
                    tracing::warn!("No handler for operation {}", operation);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Handler failed: {}", e);
                    continue;
                }
            };

            if let Some(reply) = outcome.reply {
                let mut packet = conn.pool().get();
                packet.metadata.id = reply.id;
                packet.metadata.operation = reply.operation;
                packet.set_content(&reply.content);

                let written = conn.write_packet(&packet).await;
                conn.pool().put(packet);
                written?;
            }

            if outcome.action == Action::Close {
                conn.flush().await?;
                return conn.close().await;
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut operations: Vec<_> = self.handlers.keys().copied().collect();
        operations.sort_unstable();
        f.debug_struct("Router").field("operations", &operations).finish()
    }
}
