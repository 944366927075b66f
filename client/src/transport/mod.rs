//! Byte channels under the protocol engine
//!
//! The engine never touches sockets. A transport only writes whole buffers
//! and reads whatever bytes are available, failing with
//! [`Error::Timeout`] when a socket operation exceeds its deadline. The
//! blocking and async variants differ only in how they wait.

mod connect;

pub use connect::{
    connect_tcp, connect_tcp_async, connect_tls, connect_tls_async, resolve, tls_connector,
};

use async_trait::async_trait;
use protocol::{Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Blocking byte channel
pub trait Transport {
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Reads at least one byte; end of stream is an error
    fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize>;

    fn shutdown(&mut self) -> Result<()>;
}

/// Async byte channel
#[async_trait]
pub trait AsyncTransport: Send {
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Reads at least one byte; end of stream is an error
    async fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize>;

    async fn shutdown(&mut self) -> Result<()>;
}

/// Any blocking stream a transport can own
pub trait Stream: Read + Write + Send {
    /// Ends the session on this stream; the default only flushes
    fn close(&mut self) -> std::io::Result<()> {
        self.flush()
    }
}

impl Stream for TcpStream {
    fn close(&mut self) -> std::io::Result<()> {
        self.flush()?;
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            result => result,
        }
    }
}

impl Stream for native_tls::TlsStream<TcpStream> {
    fn close(&mut self) -> std::io::Result<()> {
        // The close_notify alert is best effort; the socket closes regardless
        if let Err(e) = native_tls::TlsStream::shutdown(self) {
            debug!("TLS close_notify failed: {}", e);
        }
        self.get_mut().close()
    }
}

impl Stream for Box<dyn Stream> {
    fn close(&mut self) -> std::io::Result<()> {
        (**self).close()
    }
}

/// Any async stream a transport can own
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for S {}

fn closed_by_peer() -> Error {
    Error::Transport("connection closed by peer".into())
}

fn map_io(error: std::io::Error, timeout: Duration) -> Error {
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout(timeout),
        _ => Error::Transport(error.to_string()),
    }
}

/// Blocking transport over a stream whose socket carries read and write
/// timeouts
///
/// The timeouts themselves are set when the socket is opened (see
/// [`connect_tcp`]); this type only turns their expiry into
/// [`Error::Timeout`].
pub struct StreamTransport<S> {
    stream: S,
    timeout: Duration,
}

impl<S: Stream> StreamTransport<S> {
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Stream> Transport for StreamTransport<S> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .write_all(data)
            .and_then(|_| self.stream.flush())
            .map_err(|e| map_io(e, self.timeout))
    }

    fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize> {
        loop {
            match self.stream.read(buffer) {
                Ok(0) => return Err(closed_by_peer()),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io(e, self.timeout)),
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stream.close().map_err(|e| map_io(e, self.timeout))
    }
}

/// Async transport that bounds every read and write with a timeout
pub struct AsyncStreamTransport<S> {
    stream: S,
    timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncStreamTransport<S> {
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncTransport for AsyncStreamTransport<S> {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(data).await?;
            stream.flush().await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result.map_err(|e| map_io(e, timeout)),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match tokio::time::timeout(self.timeout, self.stream.read(buffer)).await {
            Ok(Ok(0)) => Err(closed_by_peer()),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(map_io(e, self.timeout)),
            Err(_) => Err(Error::Timeout(self.timeout)),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.stream.shutdown()).await {
            Ok(result) => result.map_err(|e| map_io(e, self.timeout)),
            Err(_) => Err(Error::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;

    impl Stream for Cursor<Vec<u8>> {}

    #[test]
    fn test_end_of_stream_is_transport_error() {
        let mut transport = StreamTransport::new(Cursor::new(Vec::new()), Duration::from_secs(1));
        let mut buffer = [0u8; 16];
        assert!(matches!(
            transport.read_some(&mut buffer),
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn test_shutdown_closes_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut transport = StreamTransport::new(stream, Duration::from_secs(1));
        transport.write_all(b"bye").unwrap();
        transport.shutdown().unwrap();

        // The transport is still alive, yet the peer sees end of stream
        let mut received = Vec::new();
        peer.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"bye");
        drop(transport);
    }

    #[test]
    fn test_timed_out_read_maps_to_timeout() {
        let error = map_io(ErrorKind::WouldBlock.into(), Duration::from_millis(5));
        assert!(matches!(error, Error::Timeout(d) if d == Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn test_async_read_times_out() {
        let (client, _peer) = tokio::io::duplex(64);
        let mut transport = AsyncStreamTransport::new(client, Duration::from_millis(20));
        let mut buffer = [0u8; 16];
        assert!(matches!(
            transport.read_some(&mut buffer).await,
            Err(Error::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_async_round_trip() {
        let (client, mut peer) = tokio::io::duplex(64);
        let mut transport = AsyncStreamTransport::new(client, Duration::from_secs(1));
        transport.write_all(b"ping").await.unwrap();

        let mut received = [0u8; 4];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"ping");

        peer.write_all(b"pong").await.unwrap();
        let mut buffer = [0u8; 16];
        let n = transport.read_some(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..n], b"pong");
    }
}
