//! TCP transport: listener and framed connection.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::{ConnectionId, TransportError, framing};

/// Counter for generating unique connection ids. Zero stays reserved
/// for [`ConnectionId::INVALID`].
static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

/// Allocates the next connection id.
///
/// The session layer calls this to name an outbound attempt before the
/// socket exists; [`TcpTransport::accept`] uses it internally.
pub fn allocate_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// A TCP listener that produces framed [`TcpConnection`]s.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Binds a listener to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self { listener })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for and accepts the next inbound connection.
    pub async fn accept(&self) -> Result<TcpConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        // Small session-layer messages; coalescing latency hurts more
        // than the extra packets.
        let _ = stream.set_nodelay(true);

        let id = allocate_connection_id();
        tracing::debug!(%id, %addr, "accepted TCP connection");

        Ok(TcpConnection::from_stream(id, stream))
    }
}

/// One framed TCP connection.
///
/// The read and write halves are locked independently so a receive in
/// flight never blocks a send. `recv` returns `Ok(None)` when the peer
/// closes cleanly between frames.
pub struct TcpConnection {
    id: ConnectionId,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpConnection {
    fn from_stream(id: ConnectionId, stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            id,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    /// Opens an outbound connection under a pre-allocated id.
    ///
    /// # Errors
    /// - [`TransportError::ConnectionRefused`] — nothing listening there
    /// - [`TransportError::Timeout`] — attempt exceeded `timeout`
    /// - [`TransportError::ConnectFailed`] — any other socket error
    pub async fn connect(
        id: ConnectionId,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| {
                if e.kind() == io::ErrorKind::ConnectionRefused {
                    TransportError::ConnectionRefused
                } else {
                    TransportError::ConnectFailed(e)
                }
            })?;
        let _ = stream.set_nodelay(true);

        tracing::debug!(%id, host, port, "outbound TCP connection established");
        Ok(Self::from_stream(id, stream))
    }

    /// Sends one framed message to the peer.
    pub async fn send(&self, body: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        framing::write_frame(&mut *writer, body).await
    }

    /// Receives the next whole message from the peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    pub async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut reader = self.reader.lock().await;
        framing::read_frame(&mut *reader).await
    }

    /// Shuts down the write half, signalling EOF to the peer.
    pub async fn close(&self) -> Result<(), TransportError> {
        use tokio::io::AsyncWriteExt;
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    /// Returns the unique identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}
