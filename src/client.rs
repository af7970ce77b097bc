//! TCP client.
//!
//! The [`ClientBuilder`] collects handlers for packets the peer sends back,
//! then connects. The [`Client`] owns the connection and a task running the
//! router over it:
//! 1. Connect the TCP stream
//! 2. Wrap it in a [`Connection`]
//! 3. Serve incoming packets with the [`Router`]
//!
//! # Example
//!
//! ```no_run
//! use framewire::router::Outcome;
//! use framewire::{Client, Metadata, Packet};
//!
//! # async fn run() -> framewire::Result<()> {
//! let client = Client::builder()
//!     .route(1, |meta: &Metadata, content: &[u8]| {
//!         println!("reply {}: {} bytes", meta.id, content.len());
//!         Outcome::none()
//!     })
//!     .connect("127.0.0.1:9000")
//!     .await?;
//!
//! let mut packet = Packet::new();
//! packet.metadata.operation = 1;
//! packet.set_content(b"ping");
//! client.write_packet(&packet).await?;
//! client.flush().await?;
//! client.close().await
//! # }
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::packet::{Packet, Pool};
use crate::protocol::Metadata;
use crate::router::{Handler, Outcome, Router};

/// Builder for configuring and connecting a [`Client`].
pub struct ClientBuilder {
    router: Router,
    pool: Option<Arc<Pool>>,
    config: ConnectionConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            pool: None,
            config: ConnectionConfig::default(),
        }
    }

    /// Register a handler for packets the server sends with `operation`.
    pub fn route<H: Handler>(mut self, operation: u16, handler: H) -> Self {
        self.router.route(operation, handler);
        self
    }

    /// Register a handler receiving MsgPack-decoded content.
    pub fn route_typed<T, F>(mut self, operation: u16, handler: F) -> Self
    where
        F: Fn(&Metadata, T) -> Outcome + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.router.route_typed(operation, handler);
        self
    }

    /// Share an existing packet pool. A private pool is created otherwise.
    pub fn pool(mut self, pool: Arc<Pool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect and start serving incoming packets.
    pub async fn connect<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        let pool = self.pool.unwrap_or_default();
        Client::connect(addr, self.router, pool, self.config).await
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected client.
pub struct Client {
    conn: Arc<Connection<TcpStream>>,
    serve_task: JoinHandle<Result<()>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to `addr` and serve incoming packets with `router`.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        router: Router,
        pool: Arc<Pool>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        config.validate()?;

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            tracing::debug!("Connected to {}", peer);
        }

        let conn = Arc::new(Connection::with_config(stream, pool, config));

        let serving = conn.clone();
        let serve_task = tokio::spawn(async move {
            let result = router.serve(&serving).await;
            if let Err(e) = &result {
                tracing::error!("Client router stopped: {}", e);
            }
            result
        });

        Ok(Self { conn, serve_task })
    }

    /// Queue a packet for the server.
    pub async fn write_packet(&self, packet: &Packet) -> Result<()> {
        self.conn.write_packet(packet).await
    }

    /// Queue a packet without waiting; fails with `Backpressure` when full.
    pub fn try_write_packet(&self, packet: &Packet) -> Result<()> {
        self.conn.try_write_packet(packet)
    }

    pub async fn flush(&self) -> Result<()> {
        self.conn.flush().await
    }

    /// Latest connection fault, if any.
    pub fn error(&self) -> Option<Error> {
        self.conn.error()
    }

    pub fn connection(&self) -> &Arc<Connection<TcpStream>> {
        &self.conn
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Close the connection and wait for the router task to finish.
    pub async fn close(self) -> Result<()> {
        let closed = self.conn.close().await;
        self.join().await?;
        closed
    }

    /// Wait until the server closes the connection (or a handler does).
    pub async fn wait_for_shutdown(self) -> Result<()> {
        self.join().await
    }

    async fn join(self) -> Result<()> {
        match self.serve_task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Client router task failed: {}", e);
                Err(Error::ConnectionClosed)
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("conn", &self.conn).finish()
    }
}
