//! Integration tests for the async connection.
//!
//! Run over an in-memory duplex pipe and over loopback TCP pairs.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use framewire::{Connection, ConnectionConfig, Error, Metadata, Packet, Pool, DEFAULT_DEADLINE};
use rand::Rng;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};

const PIPE_BUFFER: usize = 64 * 1024;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    data
}

fn pipe_pair(pool: &Arc<Pool>) -> (Connection<DuplexStream>, Connection<DuplexStream>) {
    let (a, b) = duplex(PIPE_BUFFER);
    (Connection::new(a, pool.clone()), Connection::new(b, pool.clone()))
}

async fn tcp_streams() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (connected.unwrap(), accepted.unwrap().0)
}

async fn tcp_pair(pool: &Arc<Pool>) -> (Connection<TcpStream>, Connection<TcpStream>) {
    let (a, b) = tcp_streams().await;
    (Connection::new(a, pool.clone()), Connection::new(b, pool.clone()))
}

fn assert_header(packet: &Packet, content_length: u32) {
    assert_eq!(packet.metadata.id, 64);
    assert_eq!(packet.metadata.operation, 32);
    assert_eq!(packet.metadata.content_length, content_length);
    assert_eq!(packet.content.len(), content_length as usize);
}

#[tokio::test]
async fn test_round_trip_empty_and_sized() {
    const PACKET_SIZE: usize = 512;
    let pool = Arc::new(Pool::new());
    let (reader, writer) = pipe_pair(&pool);

    let mut p = pool.get();
    p.metadata.id = 64;
    p.metadata.operation = 32;
    writer.write_packet(&p).await.unwrap();
    pool.put(p);

    let mut p = reader.read_packet().await.unwrap();
    assert_header(&p, 0);
    assert!(p.content.is_empty());

    let data = random_bytes(PACKET_SIZE);
    p.content.write(&data);
    p.metadata.content_length = PACKET_SIZE as u32;
    writer.write_packet(&p).await.unwrap();
    pool.put(p);

    let p = reader.read_packet().await.unwrap();
    assert_header(&p, PACKET_SIZE as u32);
    assert_eq!(p.content.as_slice(), &data[..]);
    pool.put(p);

    reader.close().await.unwrap();
    writer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_write_keeps_order() {
    const TEST_SIZE: usize = 100_000;
    const PACKET_SIZE: usize = 512;
    let pool = Arc::new(Pool::new());
    let (reader, writer) = pipe_pair(&pool);
    let writer = Arc::new(writer);

    let random_data: Arc<Vec<Vec<u8>>> =
        Arc::new((0..TEST_SIZE).map(|_| random_bytes(PACKET_SIZE)).collect());

    // Queues are bounded, so the writer must run alongside the reader.
    let producer = {
        let writer = writer.clone();
        let random_data = random_data.clone();
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut p = pool.get();
            p.metadata.id = 64;
            p.metadata.operation = 32;
            for data in random_data.iter() {
                p.set_content(data);
                writer.write_packet(&p).await.unwrap();
            }
            pool.put(p);
        })
    };

    for expected in random_data.iter() {
        let p = reader.read_packet().await.unwrap();
        assert_header(&p, PACKET_SIZE as u32);
        assert_eq!(p.content.as_slice(), &expected[..]);
        pool.put(p);
    }

    producer.await.unwrap();
    reader.close().await.unwrap();
    writer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_raw_passthrough_after_packets() {
    const TEST_SIZE: usize = 10_000;
    const PACKET_SIZE: usize = 32;
    let pool = Arc::new(Pool::new());
    let (reader, writer) = tcp_pair(&pool).await;
    let writer = Arc::new(writer);

    let data = random_bytes(PACKET_SIZE);
    let producer = {
        let writer = writer.clone();
        let mut p = Packet::new();
        p.metadata.id = 64;
        p.metadata.operation = 32;
        p.set_content(&data);
        tokio::spawn(async move {
            for _ in 0..TEST_SIZE {
                writer.write_packet(&p).await.unwrap();
            }
        })
    };

    for _ in 0..TEST_SIZE {
        let p = reader.read_packet().await.unwrap();
        assert_header(&p, PACKET_SIZE as u32);
        assert_eq!(p.content.as_slice(), &data[..]);
        pool.put(p);
    }
    producer.await.unwrap();

    let mut raw_reader = reader.raw().await.unwrap();
    let mut raw_writer = writer.raw().await.unwrap();

    let message = b"TEST CASE MESSAGE";
    raw_reader.write_all(message).await.unwrap();

    let mut received = [0u8; 17];
    raw_writer.read_exact(&mut received).await.unwrap();
    assert_eq!(&received, message);

    // The streams now belong to the raw handles.
    reader.close().await.unwrap();
    writer.close().await.unwrap();
    assert!(reader.is_closed());
    assert!(matches!(writer.raw().await, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_raw_replays_unframed_bytes() {
    let pool = Arc::new(Pool::new());
    let (stream, mut peer) = duplex(PIPE_BUFFER);
    let conn = Connection::new(stream, pool);

    let mut bytes = Metadata::new(1, 1, 4).encode().to_vec();
    bytes.extend_from_slice(b"full");
    bytes.extend_from_slice(&Metadata::new(2, 2, 100).encode());
    bytes.extend_from_slice(b"not a frame yet");
    peer.write_all(&bytes).await.unwrap();

    let first = conn.read_packet().await.unwrap();
    assert_eq!(first.content.as_slice(), b"full");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut raw = conn.raw().await.unwrap();
    peer.write_all(b" tail").await.unwrap();
    drop(peer);

    let mut rest = Vec::new();
    raw.read_to_end(&mut rest).await.unwrap();

    let mut expected = bytes[12..].to_vec();
    expected.extend_from_slice(b" tail");
    assert_eq!(rest, expected);
}

#[tokio::test]
async fn test_read_close_surfaces_error_to_writer() {
    let pool = Arc::new(Pool::new());
    let (reader, writer) = pipe_pair(&pool);

    let mut p = pool.get();
    p.metadata.id = 64;
    p.metadata.operation = 32;
    writer.write_packet(&p).await.unwrap();
    writer.flush().await.unwrap();

    let received = reader.read_packet().await.unwrap();
    assert_header(&received, 0);

    // Forced close: the peer's stream disappears underneath it.
    drop(reader);
    tokio::time::sleep(Duration::from_millis(100)).await;

    if writer.write_packet(&p).await.is_ok() {
        assert!(writer.flush().await.is_err());
    }
    assert!(writer.error().is_some());

    writer.close().await.unwrap();
}

#[tokio::test]
async fn test_read_available_after_close() {
    let pool = Arc::new(Pool::new());
    let (reader, writer) = pipe_pair(&pool);

    let mut p = pool.get();
    p.metadata.id = 64;
    p.metadata.operation = 32;
    writer.write_packet(&p).await.unwrap();
    writer.write_packet(&p).await.unwrap();
    pool.put(p);

    writer.close().await.unwrap();

    for _ in 0..2 {
        let p = reader.read_packet().await.unwrap();
        assert_header(&p, 0);
        pool.put(p);
    }
    assert!(matches!(reader.read_packet().await, Err(Error::ConnectionClosed)));

    reader.close().await.unwrap();
    writer.close().await.unwrap();
}

#[tokio::test]
async fn test_write_close_reports_eof() {
    let pool = Arc::new(Pool::new());
    let (reader, writer) = pipe_pair(&pool);

    let mut p = pool.get();
    p.metadata.id = 64;
    p.metadata.operation = 32;
    writer.write_packet(&p).await.unwrap();
    writer.flush().await.unwrap();

    let received = reader.read_packet().await.unwrap();
    assert_header(&received, 0);
    pool.put(received);

    writer.write_packet(&p).await.unwrap();
    pool.put(p);
    drop(writer);

    tokio::time::sleep(DEFAULT_DEADLINE * 2).await;

    // The second packet may or may not have made it out before the drop.
    let err = loop {
        match reader.read_packet().await {
            Ok(p) => pool.put(p),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, Error::ConnectionClosed));
    assert_eq!(
        reader.error().and_then(|e| e.io_kind()),
        Some(io::ErrorKind::UnexpectedEof)
    );

    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_idle_timeout_and_bounded_fault_detection() {
    let pool = Arc::new(Pool::new());
    let (reader, writer) = tcp_pair(&pool).await;

    let mut p = pool.get();
    p.metadata.id = 64;
    p.metadata.operation = 32;
    writer.write_packet(&p).await.unwrap();
    writer.flush().await.unwrap();

    let received = reader.read_packet().await.unwrap();
    assert_header(&received, 0);
    pool.put(received);

    // Idle deadlines expire without faulting the connection.
    tokio::time::sleep(DEFAULT_DEADLINE * 5).await;
    assert!(writer.error().is_none());
    assert!(reader.error().is_none());

    writer.write_packet(&p).await.unwrap();
    writer.flush().await.unwrap();
    pool.put(p);

    tokio::time::sleep(DEFAULT_DEADLINE).await;
    assert_eq!(reader.incoming_len(), 1);

    drop(writer);
    tokio::time::sleep(DEFAULT_DEADLINE * 5).await;

    let p = reader.read_packet().await.unwrap();
    assert_header(&p, 0);
    assert!(matches!(reader.read_packet().await, Err(Error::ConnectionClosed)));
    assert!(reader.error().is_some());

    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_oversized_frame_faults_connection() {
    let pool = Arc::new(Pool::new());
    let (stream, mut peer) = duplex(PIPE_BUFFER);
    let config = ConnectionConfig::default().with_max_content_length(1024);
    let conn = Connection::with_config(stream, pool, config);

    peer.write_all(&Metadata::new(1, 1, 4096).encode()).await.unwrap();

    assert!(matches!(conn.read_packet().await, Err(Error::ConnectionClosed)));
    assert!(matches!(conn.error(), Some(Error::Protocol(_))));

    let mut p = Packet::new();
    p.set_content(b"rejected");
    assert!(matches!(conn.write_packet(&p).await, Err(Error::Protocol(_))));
}

#[tokio::test]
async fn test_close_wakes_blocked_reader() {
    let pool = Arc::new(Pool::new());
    let (reader, _writer) = pipe_pair(&pool);
    let reader = Arc::new(reader);

    let waiting = {
        let reader = reader.clone();
        tokio::spawn(async move { reader.read_packet().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    reader.close().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .expect("read_packet should be woken by close")
        .unwrap();
    assert!(matches!(result, Err(Error::ConnectionClosed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_do_not_interleave_frames() {
    const WRITERS: u16 = 8;
    const PER_WRITER: u16 = 500;
    let pool = Arc::new(Pool::new());
    let (reader, writer) = tcp_pair(&pool).await;
    let writer = Arc::new(writer);

    let mut tasks = Vec::new();
    for operation in 0..WRITERS {
        let writer = writer.clone();
        tasks.push(tokio::spawn(async move {
            let mut p = Packet::new();
            p.metadata.operation = operation;
            for id in 0..PER_WRITER {
                p.metadata.id = id;
                p.set_content(&vec![operation as u8; 100 + operation as usize]);
                writer.write_packet(&p).await.unwrap();
            }
        }));
    }

    let mut next_id = vec![0u16; WRITERS as usize];
    for _ in 0..(WRITERS * PER_WRITER) {
        let p = reader.read_packet().await.unwrap();
        let operation = p.metadata.operation;

        // Per-writer order is preserved and content is never torn.
        assert_eq!(p.metadata.id, next_id[operation as usize]);
        next_id[operation as usize] += 1;
        assert_eq!(p.content.len(), 100 + operation as usize);
        assert!(p.content.iter().all(|&b| b == operation as u8));
        pool.put(p);
    }

    for task in tasks {
        task.await.unwrap();
    }
    writer.close().await.unwrap();
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_pool_recycles_reset_packets() {
    let pool = Arc::new(Pool::with_max_idle(4));
    let (reader, writer) = pipe_pair(&pool);

    let mut p = Packet::new();
    p.metadata.id = 64;
    p.metadata.operation = 32;
    p.set_content(&random_bytes(256));
    writer.write_packet(&p).await.unwrap();

    let received = reader.read_packet().await.unwrap();
    pool.put(received);

    let recycled = pool.get();
    assert_eq!(recycled.metadata, Metadata::default());
    assert!(recycled.content.is_empty());
    assert!(recycled.content.capacity() >= 256);
}
