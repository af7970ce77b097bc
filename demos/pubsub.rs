//! Topic board: publish messages to topics, subscribe to read them back.
//!
//! Payloads are MsgPack-encoded structs handled with typed routes. Every
//! connection gets its own router; the topic store is shared between them.
//!
//! ```text
//! RUST_LOG=framewire=debug cargo run --example pubsub
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use framewire::{Client, ConnectionConfig, Metadata, Outcome, Packet, Pool, Reply, Router, Server};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const PUB: u16 = 1;
const SUB: u16 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct Publish {
    topic: String,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Subscribe {
    topic: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Published {
    topic: String,
    count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Messages {
    topic: String,
    messages: Vec<String>,
}

type Topics = Arc<Mutex<HashMap<String, Vec<String>>>>;

fn reply<T: Serialize>(meta: &Metadata, value: &T) -> Outcome {
    match Reply::msgpack(meta.id, meta.operation, value) {
        Ok(reply) => Outcome::reply(reply),
        Err(e) => {
            tracing::warn!("Failed to encode reply: {}", e);
            Outcome::none()
        }
    }
}

fn board_router(topics: Topics) -> Router {
    let mut router = Router::new();

    let store = topics.clone();
    router.route_typed(PUB, move |meta: &Metadata, publish: Publish| {
        let mut topics = store.lock().unwrap_or_else(|e| e.into_inner());
        let messages = topics.entry(publish.topic.clone()).or_default();
        messages.push(publish.message);
        reply(meta, &Published { topic: publish.topic, count: messages.len() })
    });

    router.route_typed(SUB, move |meta: &Metadata, subscribe: Subscribe| {
        let topics = topics.lock().unwrap_or_else(|e| e.into_inner());
        let messages = topics.get(&subscribe.topic).cloned().unwrap_or_default();
        reply(meta, &Messages { topic: subscribe.topic, messages })
    });

    router
}

fn request<T: Serialize>(id: u16, operation: u16, value: &T) -> framewire::Result<Packet> {
    let mut packet = Packet::new();
    packet.metadata.id = id;
    packet.metadata.operation = operation;
    packet.set_msgpack(value)?;
    Ok(packet)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framewire=info,pubsub=info")))
        .with(fmt::layer())
        .init();

    let topics = Topics::default();
    let server = Arc::new(
        Server::bind(
            "127.0.0.1:0",
            move || board_router(topics.clone()),
            Arc::new(Pool::new()),
            ConnectionConfig::default(),
        )
        .await?,
    );
    let addr = server.local_addr()?;
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve().await })
    };

    let (tx, mut events) = mpsc::unbounded_channel::<String>();
    let published = tx.clone();
    let client = Client::builder()
        .route_typed(PUB, move |_: &Metadata, ack: Published| {
            let _ = published.send(format!("published to {} ({} total)", ack.topic, ack.count));
            Outcome::none()
        })
        .route_typed(SUB, move |_: &Metadata, board: Messages| {
            let _ = tx.send(format!("{}: {:?}", board.topic, board.messages));
            Outcome::none()
        })
        .connect(addr)
        .await?;

    let posts = [("news", "framewire released"), ("news", "pools are fast"), ("chat", "hello")];
    for (id, (topic, message)) in posts.iter().enumerate() {
        let publish = Publish { topic: topic.to_string(), message: message.to_string() };
        client.write_packet(&request(id as u16, PUB, &publish)?).await?;
    }
    client.write_packet(&request(100, SUB, &Subscribe { topic: "news".into() })?).await?;
    client.flush().await?;

    for _ in 0..posts.len() + 1 {
        if let Some(event) = events.recv().await {
            tracing::info!("{}", event);
        }
    }

    client.close().await?;
    server.shutdown();
    serving.await??;

    Ok(())
}
