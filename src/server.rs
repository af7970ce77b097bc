//! TCP server.
//!
//! Accepts connections and runs one [`Router`] per connection on its own
//! task. Routers are built by a factory so handlers can keep per-connection
//! state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framewire::router::{Outcome, Reply, Router};
//! use framewire::{ConnectionConfig, Metadata, Pool, Server};
//!
//! # async fn run() -> framewire::Result<()> {
//! let server = Server::bind(
//!     "127.0.0.1:9000",
//!     || {
//!         let mut router = Router::new();
//!         router.route(1, |meta: &Metadata, content: &[u8]| {
//!             Outcome::reply(Reply::new(meta.id, meta.operation, content.to_vec()))
//!         });
//!         router
//!     },
//!     Arc::new(Pool::new()),
//!     ConnectionConfig::default(),
//! )
//! .await?;
//!
//! server.serve().await
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::ConnectionConfig;
use crate::connection::{wait_for_shutdown, Connection};
use crate::error::Result;
use crate::packet::Pool;
use crate::router::Router;

type RouterFactory = dyn Fn() -> Router + Send + Sync;

/// Listening server.
///
/// All methods take `&self`; share it as `Arc<Server>` to call
/// [`shutdown`](Self::shutdown) while [`serve`](Self::serve) runs elsewhere.
pub struct Server {
    listener: TcpListener,
    factory: Arc<RouterFactory>,
    pool: Arc<Pool>,
    config: ConnectionConfig,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// Bind a listener. Connections are accepted once [`serve`](Self::serve) runs.
    pub async fn bind<A, F>(addr: A, router_factory: F, pool: Arc<Pool>, config: ConnectionConfig) -> Result<Self>
    where
        A: ToSocketAddrs,
        F: Fn() -> Router + Send + Sync + 'static,
    {
        config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener,
            factory: Arc::new(router_factory),
            pool,
            config,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called.
    ///
    /// Shutdown closes every open connection; this returns once all of their
    /// tasks have finished.
    pub async fn serve(&self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut connections = JoinSet::new();

        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("Listening on {}", addr),
            Err(e) => tracing::warn!("Listening on unknown address: {}", e),
        }

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!("Accepted connection from {}", peer);
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            (self.factory)(),
                            self.pool.clone(),
                            self.config.clone(),
                            self.shutdown.subscribe(),
                        ));
                    }
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                },
                // Reap finished connections so the set does not grow without bound.
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        tracing::info!("Server shutting down, {} connections open", connections.len());
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Connection task failed: {}", e);
            }
        }
        Ok(())
    }

    /// Stop accepting and close every open connection.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("config", &self.config)
            .finish()
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    pool: Arc<Pool>,
    config: ConnectionConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let conn = Connection::with_config(stream, pool, config);

    tokio::select! {
        served = router.serve(&conn) => {
            if let Err(e) = served {
                tracing::warn!("Connection {} failed: {}", peer, e);
            }
        }
        _ = wait_for_shutdown(&mut shutdown) => {}
    }

    if let Err(e) = conn.close().await {
        tracing::debug!("Closing {} failed: {}", peer, e);
    }
    if let Some(e) = conn.error().filter(|e| e.io_kind() != Some(std::io::ErrorKind::UnexpectedEof)) {
        tracing::debug!("Connection {} ended with fault: {}", peer, e);
    }
    tracing::debug!("Connection {} closed", peer);
}
