//! Asynchronous packet connection.
//!
//! A [`Connection`] owns one byte stream and runs two tasks on it:
//!
//! ```text
//!                 ┌──────────── Connection ────────────┐
//! write_packet ──►│ outgoing channel ─► writer task ───┼──► stream
//! flush ─────────►│                                    │
//!                 │                                    │
//! read_packet ◄───│ incoming queue ◄─── read task ◄────┼─── stream
//!                 └────────────────────────────────────┘
//! ```
//!
//! Callers never block on the stream itself. Faults raised by either task are
//! stored in an error slot and surfaced by later calls; once a fault is known
//! every write fails fast while reads keep draining what was already decoded.

mod raw;
mod reader;
mod writer;

pub use raw::RawConn;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::packet::{Packet, Pool};
use crate::protocol::encode_packet;
use crate::queue::IncomingQueue;
use writer::Outbound;

/// State shared between the connection handle and its tasks.
pub(crate) struct Shared {
    closed: AtomicBool,
    error: Mutex<Option<Error>>,
    /// First write failure, reported by `flush` as [`Error::Flush`].
    write_error: Mutex<Option<Arc<io::Error>>>,
    pub(crate) incoming: IncomingQueue,
}

impl Shared {
    pub(crate) fn new(incoming_capacity: usize) -> Self {
        Self {
            closed: AtomicBool::new(false),
            error: Mutex::new(None),
            write_error: Mutex::new(None),
            incoming: IncomingQueue::new(incoming_capacity),
        }
    }

    /// Store a fault. The most recent one wins.
    pub(crate) fn record_error(&self, error: Error) {
        tracing::debug!("Connection fault: {}", error);
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Store a write failure in both the write slot and the error slot.
    pub(crate) fn record_write_error(&self, error: Arc<io::Error>) {
        self.write_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| error.clone());
        self.record_error(Error::Io(error));
    }

    pub(crate) fn write_error(&self) -> Option<Arc<io::Error>> {
        self.write_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Resolve once the shutdown flag is raised or its sender is gone.
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

struct Tasks<S> {
    reader: JoinHandle<(ReadHalf<S>, Bytes)>,
    writer: JoinHandle<WriteHalf<S>>,
}

/// Packet connection over any async byte stream.
///
/// Must be created inside a tokio runtime. All methods take `&self`, so a
/// connection is typically shared as `Arc<Connection<S>>` between a reading
/// task and any number of writers.
///
/// ```no_run
/// use std::sync::Arc;
/// use framewire::{Connection, Packet, Pool};
/// use tokio::net::TcpStream;
///
/// # async fn run() -> framewire::Result<()> {
/// let stream = TcpStream::connect("127.0.0.1:9000").await?;
/// let conn = Connection::new(stream, Arc::new(Pool::new()));
///
/// let mut packet = Packet::new();
/// packet.metadata.operation = 1;
/// packet.set_content(b"hello");
/// conn.write_packet(&packet).await?;
/// conn.flush().await?;
///
/// let reply = conn.read_packet().await?;
/// conn.pool().put(reply);
/// conn.close().await
/// # }
/// ```
pub struct Connection<S> {
    shared: Arc<Shared>,
    outgoing: Mutex<Option<mpsc::Sender<Outbound>>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Option<Tasks<S>>>,
    pool: Arc<Pool>,
    config: ConnectionConfig,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap `stream` with the default configuration.
    pub fn new(stream: S, pool: Arc<Pool>) -> Self {
        Self::with_config(stream, pool, ConnectionConfig::default())
    }

    /// Wrap `stream` and start its read and write tasks.
    ///
    /// A zero capacity or a read deadline below
    /// [`MIN_READ_DEADLINE`](crate::config::MIN_READ_DEADLINE) is raised to
    /// the minimum.
    pub fn with_config(stream: S, pool: Arc<Pool>, config: ConnectionConfig) -> Self {
        let config = config.normalized();
        let shared = Arc::new(Shared::new(config.incoming_capacity));
        let (tx, rx) = mpsc::channel(config.outgoing_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (read_half, write_half) = tokio::io::split(stream);

        let reader = tokio::spawn(reader::read_loop(
            read_half,
            shared.clone(),
            pool.clone(),
            config.clone(),
            shutdown_rx,
        ));
        let writer = tokio::spawn(writer::writer_loop(rx, write_half, shared.clone()));

        Self {
            shared,
            outgoing: Mutex::new(Some(tx)),
            shutdown,
            tasks: Mutex::new(Some(Tasks { reader, writer })),
            pool,
            config,
        }
    }

    /// Queue a packet for sending.
    ///
    /// Returns once the connection holds its own copy of the bytes; the
    /// packet can be reused or returned to the pool right away. Waits while
    /// the outgoing queue is full.
    pub async fn write_packet(&self, packet: &Packet) -> Result<()> {
        self.check_open()?;
        let frame = encode_packet(packet)?;
        self.send(Outbound::Frame(frame)).await
    }

    /// Queue a packet without waiting.
    ///
    /// Fails with [`Error::Backpressure`] when the outgoing queue is full.
    pub fn try_write_packet(&self, packet: &Packet) -> Result<()> {
        self.check_open()?;
        let frame = encode_packet(packet)?;
        let sender = self.sender()?;

        match sender.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Backpressure),
            Err(TrySendError::Closed(_)) => Err(self.fault_or_closed()),
        }
    }

    /// Wait until every packet written so far has been flushed to the stream.
    ///
    /// A failed write is always reported as [`Error::Flush`], whether it
    /// happened before this call or while it waited.
    pub async fn flush(&self) -> Result<()> {
        self.flush_inner().await.map_err(|e| match (e, self.shared.write_error()) {
            (Error::Io(_), Some(write_error)) => Error::Flush(write_error),
            (e, _) => e,
        })
    }

    async fn flush_inner(&self) -> Result<()> {
        self.check_open()?;
        let (ack, done) = oneshot::channel();
        self.send(Outbound::Flush(ack)).await?;

        match done.await {
            Ok(result) => result,
            Err(_) => Err(self.fault_or_closed()),
        }
    }

    /// Next decoded packet, in arrival order.
    ///
    /// After close or a fault, packets already decoded are still returned;
    /// once they are drained this fails with [`Error::ConnectionClosed`].
    /// Hand the packet back with `pool().put(packet)` when done.
    pub async fn read_packet(&self) -> Result<Packet> {
        self.shared.incoming.pop().await.ok_or(Error::ConnectionClosed)
    }

    /// Drain pending writes, stop both tasks and shut the stream down.
    ///
    /// Idempotent. Draining is bounded by `close_timeout`; frames still queued
    /// after that are dropped, the stream is dropped without a graceful
    /// shutdown and a `TimedOut` fault is recorded and returned.
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("Closing connection");

        let (read, write, _) = self.stop().await?;

        let mut stream = read.unsplit(write);
        match stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::BrokenPipe
                        | io::ErrorKind::NotConnected
                        | io::ErrorKind::ConnectionReset
                ) =>
            {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop packet processing and take the underlying stream back.
    ///
    /// Pending writes are drained first. The connection counts as closed
    /// afterwards and a later [`close`](Self::close) leaves the stream alone.
    pub async fn raw(&self) -> Result<RawConn<S>> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::ConnectionClosed);
        }
        tracing::debug!("Switching connection to raw mode");

        let (read, write, buffered) = self.stop().await?;
        Ok(RawConn::new(read.unsplit(write), buffered))
    }

    /// Latest fault raised by the read or write task, if any.
    pub fn error(&self) -> Option<Error> {
        self.shared.error()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Decoded packets waiting for `read_packet`.
    pub fn incoming_len(&self) -> usize {
        self.shared.incoming.len()
    }

    /// Pool decoded packets are drawn from.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn check_open(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        match self.shared.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fault_or_closed(&self) -> Error {
        self.shared.error().unwrap_or(Error::ConnectionClosed)
    }

    fn sender(&self) -> Result<mpsc::Sender<Outbound>> {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::ConnectionClosed)
    }

    /// Enqueue onto the outgoing channel, giving up when the connection stops.
    async fn send(&self, item: Outbound) -> Result<()> {
        let sender = self.sender()?;
        let mut shutdown = self.shutdown.subscribe();

        tokio::select! {
            sent = sender.send(item) => sent.map_err(|_| self.fault_or_closed()),
            _ = wait_for_shutdown(&mut shutdown) => Err(self.fault_or_closed()),
        }
    }

    /// Tear down both tasks and collect what they hand back.
    ///
    /// Fails when the outgoing queue could not be drained within
    /// `close_timeout` or a task did not return its half of the stream.
    async fn stop(&self) -> Result<(ReadHalf<S>, WriteHalf<S>, Bytes)> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner).take();

        // Dropping the last sender lets the writer drain and exit.
        drop(self.outgoing.lock().unwrap_or_else(PoisonError::into_inner).take());
        self.shutdown.send_replace(true);
        self.shared.incoming.close();

        let Tasks { reader, mut writer } = tasks.ok_or(Error::ConnectionClosed)?;

        let write = match tokio::time::timeout(self.config.close_timeout, &mut writer).await {
            Ok(Ok(half)) => Ok(half),
            Ok(Err(e)) => {
                tracing::error!("Writer task failed: {}", e);
                Err(task_failed(e))
            }
            Err(_) => {
                tracing::warn!(
                    "Outgoing queue not drained within {:?}, dropping pending frames",
                    self.config.close_timeout
                );
                writer.abort();
                let fault = Error::from(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "outgoing queue not drained before close timeout",
                ));
                self.shared.record_error(fault.clone());
                Err(fault)
            }
        };

        let read = match reader.await {
            Ok(read) => Ok(read),
            Err(e) => {
                tracing::error!("Read task failed: {}", e);
                Err(task_failed(e))
            }
        };

        let write_half = write?;
        let (read_half, buffered) = read?;
        Ok((read_half, write_half, buffered))
    }
}

fn task_failed(e: tokio::task::JoinError) -> Error {
    Error::from(io::Error::new(io::ErrorKind::Other, format!("connection task failed: {e}")))
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shutdown.send_replace(true);
        self.shared.incoming.close();

        if let Some(tasks) = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            tasks.reader.abort();
            tasks.writer.abort();
        }
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.shared.is_closed())
            .field("incoming", &self.shared.incoming.len())
            .field("error", &self.shared.error())
            .finish()
    }
}
