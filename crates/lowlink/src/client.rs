//! `ClientNetworkManager`: the outbound side of the session layer.
//!
//! Owns at most one connection and a private runtime for its I/O.
//! Every public operation returns immediately; outcomes of `connect`
//! arrive later through [`process_message`](ClientNetworkManager::process_message),
//! which the application must call on every tick.

use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use lowlink_protocol::{MessageCode, NetworkMessage, ProtocolError, WireReader, encode_message};
use lowlink_transport::{TcpConnection, allocate_connection_id};

use crate::config::{Channel, ClientConfig};
use crate::event::TransportEvent;
use crate::peer::{self, PeerHandle};
use crate::registry::HandlerRegistry;
use crate::{Connection, ConnectionState, LowlinkError, NetworkError};

/// Manages one outbound connection: lifecycle, sending, and the pump.
///
/// Single-threaded cooperative model: all state transitions and
/// callback invocations happen inside [`process_message`] (or inside
/// [`disconnect`](Self::disconnect), which delivers its notification
/// synchronously), on whatever thread the application calls them from.
/// The background runtime only ever pushes completed results into the
/// event queue.
pub struct ClientNetworkManager {
    config: ClientConfig,
    runtime: Runtime,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    registry: HandlerRegistry,
    connection: Connection,
    peer: Option<PeerHandle>,
    connecting_event: Vec<Box<dyn FnMut() + Send>>,
    connecting_failed_event: Vec<Box<dyn FnMut(NetworkError) + Send>>,
    connected_event: Vec<Box<dyn FnMut(&Connection) + Send>>,
    disconnected_event: Vec<Box<dyn FnMut(&Connection) + Send>>,
}

impl ClientNetworkManager {
    /// Creates a manager with its private background runtime.
    pub fn new(config: ClientConfig) -> Result<Self, LowlinkError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("lowlink-client")
            .enable_all()
            .build()
            .map_err(LowlinkError::Runtime)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            runtime,
            events_tx,
            events_rx,
            registry: HandlerRegistry::new(),
            connection: Connection::idle(),
            peer: None,
            connecting_event: Vec::new(),
            connecting_failed_event: Vec::new(),
            connected_event: Vec::new(),
            disconnected_event: Vec::new(),
        })
    }

    // -- Event subscription (invoked in registration order) ---------------

    /// Called when a connect attempt has started.
    pub fn on_connecting(&mut self, callback: impl FnMut() + Send + 'static) {
        self.connecting_event.push(Box::new(callback));
    }

    /// Called when a connect attempt failed; the connection is back at
    /// Disconnected with `last_error` set.
    pub fn on_connecting_failed(&mut self, callback: impl FnMut(NetworkError) + Send + 'static) {
        self.connecting_failed_event.push(Box::new(callback));
    }

    /// Called when the link is established.
    pub fn on_connected(&mut self, callback: impl FnMut(&Connection) + Send + 'static) {
        self.connected_event.push(Box::new(callback));
    }

    /// Called when the link is torn down — by the peer, an error, or a
    /// local [`disconnect`](Self::disconnect).
    pub fn on_disconnected(&mut self, callback: impl FnMut(&Connection) + Send + 'static) {
        self.disconnected_event.push(Box::new(callback));
    }

    /// Registers `handler` for `code`.
    ///
    /// Register everything before calling [`connect`](Self::connect);
    /// later registration works but racing it against inbound traffic
    /// is the caller's responsibility.
    ///
    /// # Errors
    /// [`LowlinkError::DuplicateHandler`] if `code` is taken.
    pub fn register_handler<F>(&mut self, code: MessageCode, handler: F) -> Result<(), LowlinkError>
    where
        F: FnMut(&Connection, &mut WireReader<'_>) -> Result<(), ProtocolError> + Send + 'static,
    {
        self.registry.register(code, handler)
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Begins an asynchronous connection attempt.
    ///
    /// Returns as soon as the attempt is accepted for processing — not
    /// when it succeeds. The outcome arrives through the pump as either
    /// a connected or a connecting-failed notification.
    ///
    /// # Errors
    /// [`LowlinkError::AlreadyConnected`] if a link or attempt already
    /// exists; no state changes in that case.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), LowlinkError> {
        if self.connection.state() != ConnectionState::Disconnected || self.peer.is_some() {
            return Err(LowlinkError::AlreadyConnected);
        }

        let id = allocate_connection_id();
        self.connection = Connection::connecting(id);
        tracing::info!(%id, host, port, "connecting");

        // Queued here so the Connecting notification flows through the
        // pump in order with the attempt's outcome.
        let _ = self.events_tx.send(TransportEvent::Connecting { id });

        let events = self.events_tx.clone();
        let host = host.to_owned();
        let timeout = self.config.connection_timeout;
        let idle_timeout = self.config.connection_timeout;
        let unreliable_queue_len = self.config.unreliable_queue_len;
        self.runtime.spawn(async move {
            match TcpConnection::connect(id, &host, port, timeout).await {
                Ok(conn) => {
                    let (handle, tasks) = peer::channel(Arc::new(conn), unreliable_queue_len);
                    // Opened must hit the queue before the reader can
                    // produce Data.
                    if events.send(TransportEvent::Opened { id, peer: handle }).is_err() {
                        return;
                    }
                    tasks.spawn(events, idle_timeout, None);
                }
                Err(e) => {
                    tracing::debug!(%id, error = %e, "connect attempt failed");
                    let _ = events.send(TransportEvent::ConnectFailed {
                        id,
                        error: NetworkError::from(&e),
                    });
                }
            }
        });

        Ok(())
    }

    /// Tears down the active connection, if any. Idempotent.
    ///
    /// A Connected link gets its disconnect notification delivered
    /// synchronously, before this returns. Cancelling an in-flight
    /// attempt produces no notification at all — the link never
    /// existed.
    pub fn disconnect(&mut self) {
        match self.connection.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting => {
                tracing::info!(id = %self.connection.connection_id(), "connect attempt cancelled");
                self.connection = Connection::idle();
            }
            ConnectionState::Connected => {
                tracing::info!(id = %self.connection.connection_id(), "disconnecting");
                if let Some(peer) = self.peer.take() {
                    peer.close(self.runtime.handle());
                }
                self.connection.mark_disconnected(None);
                for callback in &mut self.disconnected_event {
                    callback(&self.connection);
                }
                // Retire the identity; any events still in flight for
                // it are ignored as stale.
                self.connection = Connection::idle();
            }
        }
    }

    // -- Sending -----------------------------------------------------------

    /// Serializes `message` and enqueues it for in-order, lossless
    /// delivery.
    ///
    /// # Errors
    /// [`LowlinkError::NotConnected`] without a Connected link;
    /// [`LowlinkError::Protocol`] if serialization fails.
    pub fn send_reliable<M: NetworkMessage>(
        &self,
        code: MessageCode,
        message: &M,
    ) -> Result<(), LowlinkError> {
        self.require_channel(Channel::Reliable)?;
        let peer = self.active_peer()?;
        peer.send_reliable(encode_message(code, message)?);
        Ok(())
    }

    /// Serializes `message` and enqueues it for best-effort delivery:
    /// it may be dropped under backpressure, never reordered or
    /// duplicated.
    ///
    /// # Errors
    /// As [`send_reliable`](Self::send_reliable).
    pub fn send_unreliable<M: NetworkMessage>(
        &self,
        code: MessageCode,
        message: &M,
    ) -> Result<(), LowlinkError> {
        self.require_channel(Channel::Unreliable)?;
        let peer = self.active_peer()?;
        peer.send_unreliable(encode_message(code, message)?);
        Ok(())
    }

    fn require_channel(&self, class: Channel) -> Result<(), LowlinkError> {
        if self.config.channels.contains(&class) {
            Ok(())
        } else {
            Err(LowlinkError::ChannelUnavailable(class))
        }
    }

    fn active_peer(&self) -> Result<&PeerHandle, LowlinkError> {
        match &self.peer {
            Some(peer) if self.connection.is_connected() => Ok(peer),
            _ => Err(LowlinkError::NotConnected),
        }
    }

    // -- The pump ----------------------------------------------------------

    /// Drains every event currently queued and dispatches it
    /// synchronously: lifecycle callbacks and message handlers all run
    /// inside this call, on the calling thread. Never blocks waiting
    /// for network data — this is a poll, not a wait. Call it every
    /// tick.
    pub fn process_message(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        let current = self.connection.connection_id();
        match event {
            TransportEvent::Connecting { id } if id == current => {
                for callback in &mut self.connecting_event {
                    callback();
                }
            }
            TransportEvent::ConnectFailed { id, error } if id == current => {
                tracing::info!(%id, %error, "connect failed");
                self.connection.mark_disconnected(Some(error));
                self.peer = None;
                for callback in &mut self.connecting_failed_event {
                    callback(error);
                }
            }
            TransportEvent::Opened { id, peer } if id == current => {
                tracing::info!(%id, "connected");
                self.peer = Some(peer);
                self.connection.mark_connected();
                for callback in &mut self.connected_event {
                    callback(&self.connection);
                }
            }
            TransportEvent::Data { id, payload } if id == current => {
                if self.connection.is_connected() {
                    self.dispatch_payload(&payload);
                }
            }
            TransportEvent::Closed { id, error } if id == current => {
                tracing::info!(%id, ?error, "disconnected");
                self.peer = None;
                self.connection.mark_disconnected(error);
                for callback in &mut self.disconnected_event {
                    callback(&self.connection);
                }
            }
            // Anything else belongs to a cancelled attempt or an
            // already-retired link.
            _ => tracing::trace!("ignoring stale transport event"),
        }
    }

    fn dispatch_payload(&mut self, payload: &[u8]) {
        let mut reader = WireReader::new(payload);
        match reader.read_u16() {
            Ok(raw) => {
                self.registry
                    .dispatch(&self.connection, MessageCode(raw), &mut reader);
            }
            Err(e) => {
                // Too short to even carry a code: drop it, keep the link.
                tracing::warn!(id = %self.connection.connection_id(), error = %e, "dropping undecodable message");
            }
        }
    }

    // -- Status ------------------------------------------------------------

    /// Returns `true` while a link or attempt exists, i.e. while the
    /// application should keep pumping.
    pub fn is_active(&self) -> bool {
        self.connection.state() != ConnectionState::Disconnected
    }

    /// Returns `true` while the link can carry messages.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Read-only view of the managed connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}
