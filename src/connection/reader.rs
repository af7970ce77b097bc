//! Read task.
//!
//! Pulls bytes off the stream, cuts them into packets with a [`FrameBuffer`]
//! and pushes each packet onto the incoming queue. A full queue suspends the
//! task, so nothing more is read until `read_packet` callers catch up.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use super::{wait_for_shutdown, Shared};
use crate::config::ConnectionConfig;
use crate::error::Error;
use crate::packet::Pool;
use crate::protocol::FrameBuffer;

/// Spare capacity below which the read buffer is topped up before reading.
const MIN_READ_SPARE: usize = 4 * 1024;

/// Main read loop.
///
/// Returns the read half together with every byte that was read but not yet
/// framed, so the stream can be handed back intact.
pub(crate) async fn read_loop<R>(
    mut reader: R,
    shared: Arc<Shared>,
    pool: Arc<Pool>,
    config: ConnectionConfig,
    mut shutdown: watch::Receiver<bool>,
) -> (R, Bytes)
where
    R: AsyncRead + Unpin,
{
    let mut frames =
        FrameBuffer::with_capacity_and_max_content(config.read_buffer_size, config.max_content_length);

    tracing::debug!("Read task started");

    'outer: loop {
        // Deliver everything already buffered before touching the stream again.
        loop {
            let packet = match frames.try_decode(&pool) {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Dropping connection: {}", e);
                    shared.record_error(e);
                    break 'outer;
                }
            };

            tokio::select! {
                pushed = shared.incoming.push(packet) => {
                    if let Err(packet) = pushed {
                        pool.put(packet);
                        break 'outer;
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => break 'outer,
            }
        }

        let buffer = frames.buffer_mut();
        if buffer.capacity() - buffer.len() < MIN_READ_SPARE {
            buffer.reserve(config.read_buffer_size.max(MIN_READ_SPARE));
        }

        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            result = tokio::time::timeout(config.read_deadline, reader.read_buf(buffer)) => {
                match result {
                    // Deadline expired with no data; re-check whether to stop.
                    Err(_) => {
                        if shared.is_closed() {
                            break;
                        }
                    }
                    Ok(Ok(0)) => {
                        shared.record_error(Error::from(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "peer closed the stream",
                        )));
                        break;
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        shared.record_error(e.into());
                        break;
                    }
                }
            }
        }
    }

    shared.incoming.close();
    tracing::debug!("Read task stopped");

    (reader, frames.into_remaining())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Metadata;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt};

    fn spawn_reader<R>(
        reader: R,
        config: ConnectionConfig,
    ) -> (Arc<Shared>, watch::Sender<bool>, tokio::task::JoinHandle<(R, Bytes)>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared::new(config.incoming_capacity));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(read_loop(reader, shared.clone(), Arc::new(Pool::new()), config, rx));
        (shared, tx, task)
    }

    fn frame_bytes(id: u16, content: &[u8]) -> Vec<u8> {
        let mut bytes = Metadata::new(id, 1, content.len() as u32).encode().to_vec();
        bytes.extend_from_slice(content);
        bytes
    }

    #[tokio::test]
    async fn test_packets_reach_queue_in_order() {
        let (mut client, server) = duplex(4096);
        let (shared, _tx, _task) = spawn_reader(server, ConnectionConfig::default());

        for id in 0..5u16 {
            client.write_all(&frame_bytes(id, b"data")).await.unwrap();
        }

        for id in 0..5u16 {
            let packet = shared.incoming.pop().await.unwrap();
            assert_eq!(packet.metadata.id, id);
            assert_eq!(packet.content.as_slice(), b"data");
        }
    }

    #[tokio::test]
    async fn test_eof_records_unexpected_eof_and_closes_queue() {
        let (mut client, server) = duplex(4096);
        let (shared, _tx, task) = spawn_reader(server, ConnectionConfig::default());

        client.write_all(&frame_bytes(1, b"last")).await.unwrap();
        drop(client);

        task.await.unwrap();

        assert_eq!(shared.incoming.pop().await.unwrap().metadata.id, 1);
        assert!(shared.incoming.pop().await.is_none());
        assert_eq!(
            shared.error().and_then(|e| e.io_kind()),
            Some(io::ErrorKind::UnexpectedEof)
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_is_protocol_error() {
        let (mut client, server) = duplex(4096);
        let config = ConnectionConfig::default().with_max_content_length(16);
        let (shared, _tx, task) = spawn_reader(server, config);

        client.write_all(&Metadata::new(1, 1, 17).encode()).await.unwrap();

        task.await.unwrap();
        assert!(matches!(shared.error(), Some(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_shutdown_returns_unframed_bytes() {
        let (mut client, server) = duplex(4096);
        let config = ConnectionConfig::default().with_read_deadline(Duration::from_millis(10));
        let (shared, tx, task) = spawn_reader(server, config);

        let bytes = frame_bytes(9, b"incomplete");
        client.write_all(&bytes[..12]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        tx.send_replace(true);
        let (_reader, remaining) = task.await.unwrap();

        assert_eq!(&remaining[..], &bytes[..12]);
        assert!(shared.error().is_none());
        assert!(shared.incoming.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_full_queue() {
        let (mut client, server) = duplex(4096);
        let config = ConnectionConfig::default().with_incoming_capacity(1);
        let (shared, tx, task) = spawn_reader(server, config);

        for id in 0..3u16 {
            client.write_all(&frame_bytes(id, b"")).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shared.incoming.len(), 1);

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("read task should stop")
            .unwrap();
    }
}
