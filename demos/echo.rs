//! Echo server and client over loopback TCP.
//!
//! This example demonstrates:
//! - Binding a [`Server`] whose router echoes every packet back
//! - Connecting a [`Client`] and collecting replies through its own router
//! - Closing both sides cleanly
//!
//! ```text
//! RUST_LOG=framewire=debug cargo run --example echo
//! ```

use std::sync::Arc;

use framewire::{Client, ConnectionConfig, Metadata, Outcome, Packet, Pool, Reply, Router, Server};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const ECHO: u16 = 1;
const MESSAGES: u16 = 5;

fn echo_router() -> Router {
    let mut router = Router::new();
    router.route(ECHO, |meta: &Metadata, content: &[u8]| {
        Outcome::reply(Reply::new(meta.id, meta.operation, content.to_vec()))
    });
    router
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framewire=info,echo=info")))
        .with(fmt::layer())
        .init();

    let pool = Arc::new(Pool::new());
    let server = Arc::new(
        Server::bind("127.0.0.1:0", echo_router, pool.clone(), ConnectionConfig::default()).await?,
    );
    let addr = server.local_addr()?;

    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve().await })
    };

    let (tx, mut replies) = mpsc::unbounded_channel();
    let client = Client::builder()
        .route(ECHO, move |meta: &Metadata, content: &[u8]| {
            let _ = tx.send((meta.id, String::from_utf8_lossy(content).into_owned()));
            Outcome::none()
        })
        .pool(pool.clone())
        .connect(addr)
        .await?;

    let mut packet: Packet = pool.get();
    packet.metadata.operation = ECHO;
    for id in 0..MESSAGES {
        packet.metadata.id = id;
        packet.set_content(format!("message #{id}").as_bytes());
        client.write_packet(&packet).await?;
    }
    pool.put(packet);
    client.flush().await?;

    for _ in 0..MESSAGES {
        if let Some((id, text)) = replies.recv().await {
            tracing::info!("reply {}: {}", id, text);
        }
    }

    client.close().await?;
    server.shutdown();
    serving.await??;

    Ok(())
}
