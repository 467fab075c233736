//! Open byte-duplex link with background reader and writer workers
//!
//! The reader forwards every chunk of received bytes as a `ReadEvent`; the writer
//! drains an outbound channel so callers never hold the stream. Both stop when the
//! link fails or `close` is called.

use crate::error::{StickError, StickResult};
use crate::stream::{ByteStream, TransportLayer};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_BUFFER_SIZE: usize = 1024;
const EVENT_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 64;

/// Something observed on the inbound side of the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// Raw bytes as received, not aligned to frames
    Data(Bytes),
    /// The link went away, with the I/O error text if it failed
    Closed(Option<String>),
}

/// Wrapper for mpsc::Sender that implements Debug
struct DebugSender<T>(mpsc::Sender<T>);

impl<T> fmt::Debug for DebugSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender").finish()
    }
}

impl<T> Deref for DebugSender<T> {
    type Target = mpsc::Sender<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Active link to the stick
pub struct Connection {
    transport: Option<Box<dyn TransportLayer>>,
    outbound: Option<DebugSender<Bytes>>,
    running: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("running", &self.is_running())
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

impl Connection {
    /// Open the transport and start the workers
    ///
    /// # Arguments
    ///
    /// * `transport` - An unopened transport
    ///
    /// # Returns
    ///
    /// The connection and the receiver of inbound events
    pub async fn open(
        mut transport: Box<dyn TransportLayer>,
    ) -> StickResult<(Self, mpsc::Receiver<ReadEvent>)> {
        transport.open().await?;
        let stream = match transport.take_stream() {
            Ok(stream) => stream,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            }
        };
        let (mut connection, events) = Self::spawn(stream);
        connection.transport = Some(transport);
        Ok((connection, events))
    }

    /// Start the workers on an already connected stream
    pub fn from_stream<S: ByteStream + 'static>(stream: S) -> (Self, mpsc::Receiver<ReadEvent>) {
        Self::spawn(Box::new(stream))
    }

    fn spawn(stream: Box<dyn ByteStream>) -> (Self, mpsc::Receiver<ReadEvent>) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(reader_loop(read_half, event_tx.clone(), running.clone()));
        let writer = tokio::spawn(writer_loop(write_half, outbound_rx, event_tx, running.clone()));

        let connection = Self {
            transport: None,
            outbound: Some(DebugSender(outbound_tx)),
            running,
            reader,
            writer: Some(writer),
        };
        (connection, event_rx)
    }

    /// Queue bytes for the writer worker
    ///
    /// # Errors
    ///
    /// Returns `StickError::Closed` once the link is down
    pub async fn write(&self, data: Bytes) -> StickResult<()> {
        if !self.is_running() {
            return Err(StickError::Closed);
        }
        let sender = self.outbound.as_ref().ok_or(StickError::Closed)?;
        sender.send(data).await.map_err(|_| StickError::Closed)
    }

    /// Check whether both workers are still serving the link
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the workers and close the transport
    ///
    /// Bytes already queued are flushed before the write side shuts down.
    pub async fn close(&mut self) -> StickResult<()> {
        self.running.store(false, Ordering::SeqCst);
        self.outbound.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        self.reader.abort();
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
        }
        log::info!("Connection closed");
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.reader.abort();
    }
}

async fn reader_loop(
    mut stream: ReadHalf<Box<dyn ByteStream>>,
    events: mpsc::Sender<ReadEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        buffer.reserve(READ_BUFFER_SIZE);
        match stream.read_buf(&mut buffer).await {
            Ok(0) => {
                log::info!("Stick link closed by peer");
                if running.swap(false, Ordering::SeqCst) {
                    let _ = events.send(ReadEvent::Closed(None)).await;
                }
                break;
            }
            Ok(n) => {
                log::debug!("Received {} bytes: {:?}", n, &buffer[..]);
                let data = buffer.split().freeze();
                if events.send(ReadEvent::Data(data)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                log::error!("Read from stick failed: {}", e);
                if running.swap(false, Ordering::SeqCst) {
                    let _ = events.send(ReadEvent::Closed(Some(e.to_string()))).await;
                }
                break;
            }
        }
    }
}

async fn writer_loop(
    mut stream: WriteHalf<Box<dyn ByteStream>>,
    mut outbound: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<ReadEvent>,
    running: Arc<AtomicBool>,
) {
    while let Some(data) = outbound.recv().await {
        log::debug!("Writing {} bytes: {:?}", data.len(), &data[..]);
        let result = match stream.write_all(&data).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            log::error!("Write to stick failed: {}", e);
            if running.swap(false, Ordering::SeqCst) {
                let _ = events.send(ReadEvent::Closed(Some(e.to_string()))).await;
            }
            return;
        }
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MockTransportLayer;
    use tokio::io::duplex;

    async fn collect_data(events: &mut mpsc::Receiver<ReadEvent>, len: usize) -> Vec<u8> {
        let mut received = Vec::new();
        while received.len() < len {
            match events.recv().await {
                Some(ReadEvent::Data(data)) => received.extend_from_slice(&data),
                other => panic!("unexpected event {:?}", other),
            }
        }
        received
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (local, mut peer) = duplex(256);
        let (connection, _events) = Connection::from_stream(local);
        connection.write(Bytes::from_static(b"\x05\x05\x03\x03000A")).await.unwrap();
        let mut buf = [0u8; 8];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\x05\x05\x03\x03000A");
    }

    #[tokio::test]
    async fn test_peer_bytes_become_events() {
        let (local, mut peer) = duplex(256);
        let (_connection, mut events) = Connection::from_stream(local);
        peer.write_all(b"\x05\x05\x03\x030000").await.unwrap();
        assert_eq!(collect_data(&mut events, 8).await, b"\x05\x05\x03\x030000");
    }

    #[tokio::test]
    async fn test_peer_close_stops_connection() {
        let (local, peer) = duplex(256);
        let (connection, mut events) = Connection::from_stream(local);
        drop(peer);
        assert_eq!(events.recv().await, Some(ReadEvent::Closed(None)));
        assert!(!connection.is_running());
        assert!(matches!(
            connection.write(Bytes::from_static(b"x")).await,
            Err(StickError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_flushes_and_stops() {
        let (local, mut peer) = duplex(256);
        let (mut connection, _events) = Connection::from_stream(local);
        connection.write(Bytes::from_static(b"abcd")).await.unwrap();
        connection.close().await.unwrap();
        assert!(!connection.is_running());

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abcd");
        assert!(connection.write(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_io_stream() {
        let stream = tokio_test::io::Builder::new()
            .read(b"\x05\x05\x03\x03")
            .read(b"0011")
            .build();
        let (_connection, mut events) = Connection::from_stream(stream);
        assert_eq!(collect_data(&mut events, 8).await, b"\x05\x05\x03\x030011");
    }

    #[tokio::test]
    async fn test_open_uses_transport_stream() {
        let (local, mut peer) = duplex(256);
        let mut stream = Some(local);
        let mut transport = MockTransportLayer::new();
        transport.expect_open().times(1).returning(|| Ok(()));
        transport.expect_take_stream().times(1).returning(move || {
            stream
                .take()
                .map(|s| Box::new(s) as Box<dyn ByteStream>)
                .ok_or(StickError::Closed)
        });
        transport.expect_close().times(1).returning(|| Ok(()));

        let (mut connection, _events) = Connection::open(Box::new(transport)).await.unwrap();
        connection.write(Bytes::from_static(b"ping")).await.unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let mut transport = MockTransportLayer::new();
        transport
            .expect_open()
            .times(1)
            .returning(|| Err(StickError::Timeout));
        let result = Connection::open(Box::new(transport)).await;
        assert!(matches!(result, Err(StickError::Timeout)));
    }
}
