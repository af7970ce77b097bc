//! Dedicated writer task.
//!
//! `write_packet` callers never touch the stream. They push encoded frames
//! into an mpsc channel drained by one writer task per connection, which
//! batches ready frames into vectored writes.
//!
//! # Architecture
//!
//! ```text
//! write_packet ─┐
//! write_packet ─┼─► mpsc::Sender<Outbound> ─► Writer Task ─► Stream
//! flush ────────┘
//! ```
//!
//! Flush requests travel through the same channel as frames, so a flush is
//! acknowledged only after every frame queued before it has been written and
//! flushed to the stream.

use std::io::{self, IoSlice};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use super::Shared;
use crate::error::{Error, Result};
use crate::protocol::{OutboundFrame, HEADER_SIZE};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Item on the outgoing channel.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(OutboundFrame),
    /// Barrier: answered once every earlier frame reached the stream.
    Flush(oneshot::Sender<Result<()>>),
}

/// Main writer loop - receives frames and writes them to the stream.
///
/// Runs until every sender is dropped (graceful drain) or a write fails.
/// Hands the write half back so the stream can be shut down or reunited.
pub(crate) async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Outbound>,
    mut writer: W,
    shared: Arc<Shared>,
) -> W
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    let mut waiters = Vec::new();

    while let Some(first) = rx.recv().await {
        // Collect additional ready frames; a flush request ends the batch.
        let mut next = Some(first);
        while let Some(item) = next.take() {
            match item {
                Outbound::Frame(frame) => batch.push(frame),
                Outbound::Flush(ack) => {
                    waiters.push(ack);
                    break;
                }
            }
            if batch.len() < MAX_BATCH_SIZE {
                next = rx.try_recv().ok();
            }
        }

        let written = write_batch(&mut writer, &batch).await;
        batch.clear();

        match written {
            Ok(()) => {
                for ack in waiters.drain(..) {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::debug!("Writer task stopping: {}", e);
                let e = Arc::new(e);
                shared.record_write_error(e.clone());

                for ack in waiters.drain(..) {
                    let _ = ack.send(Err(Error::Flush(e.clone())));
                }

                // Fail every flush still queued behind the broken write.
                rx.close();
                while let Some(item) = rx.recv().await {
                    if let Outbound::Flush(ack) = item {
                        let _ = ack.send(Err(Error::Flush(e.clone())));
                    }
                }
                break;
            }
        }
    }

    writer
}

/// Write a batch of frames using scatter/gather I/O (write_vectored), then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        total_written += written;
    }

    writer.flush().await
}

/// Build IoSlice array for the data after `skip_bytes` already written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let header_end = skipped + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(skipped);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        skipped = header_end;

        if !frame.payload.is_empty() {
            let payload_end = skipped + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(skipped);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            skipped = payload_end;
        }
    }

    slices
}
