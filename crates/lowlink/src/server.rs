//! `ServerNetworkManager`: the listening side of the session layer.
//!
//! Accepts up to `max_connections` concurrent links, tracks each as a
//! [`Connection`], and delivers everything — accepts, data, closes —
//! through the same synchronous pump model as the client side.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lowlink_protocol::{MessageCode, NetworkMessage, ProtocolError, WireReader, encode_message};
use lowlink_transport::{ConnectionId, TcpTransport};

use crate::config::{Channel, ServerConfig};
use crate::event::TransportEvent;
use crate::peer::{self, PeerHandle};
use crate::registry::HandlerRegistry;
use crate::{Connection, LowlinkError};

/// One accepted link: its application-visible state plus the handle
/// used to push outbound bytes to its writer task.
struct Remote {
    connection: Connection,
    peer: PeerHandle,
}

/// Manages a listening socket and every connection accepted on it.
///
/// All callbacks and handlers run inside
/// [`process_message`](ServerNetworkManager::process_message) (or
/// [`shutdown`](ServerNetworkManager::shutdown), which delivers its
/// disconnect notifications synchronously), on the calling thread.
pub struct ServerNetworkManager {
    config: ServerConfig,
    runtime: Runtime,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    registry: HandlerRegistry,
    connections: HashMap<ConnectionId, Remote>,
    listener_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    connected_event: Vec<Box<dyn FnMut(&Connection) + Send>>,
    disconnected_event: Vec<Box<dyn FnMut(&Connection) + Send>>,
}

impl ServerNetworkManager {
    /// Creates a manager with its private background runtime.
    pub fn new(config: ServerConfig) -> Result<Self, LowlinkError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("lowlink-server")
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
            connections: HashMap::new(),
            listener_task: None,
            local_addr: None,
            connected_event: Vec::new(),
            disconnected_event: Vec::new(),
        })
    }

    // -- Event subscription ------------------------------------------------

    /// Called for each newly accepted connection.
    pub fn on_connected(&mut self, callback: impl FnMut(&Connection) + Send + 'static) {
        self.connected_event.push(Box::new(callback));
    }

    /// Called for each connection that went away — remote close, error,
    /// or local [`shutdown`](Self::shutdown).
    pub fn on_disconnected(&mut self, callback: impl FnMut(&Connection) + Send + 'static) {
        self.disconnected_event.push(Box::new(callback));
    }

    /// Registers `handler` for `code`.
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

    /// Binds `port` and starts accepting in the background.
    ///
    /// Binding happens synchronously so a taken port is reported here;
    /// accepted connections then arrive through the pump. Port 0 binds
    /// an ephemeral port, readable via [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    /// [`LowlinkError::AlreadyListening`] if already listening;
    /// [`LowlinkError::Transport`] if the bind fails.
    pub fn listen(&mut self, port: u16) -> Result<(), LowlinkError> {
        if self.listener_task.is_some() {
            return Err(LowlinkError::AlreadyListening);
        }

        let transport = self
            .runtime
            .block_on(TcpTransport::bind(&format!("0.0.0.0:{port}")))?;
        let addr = transport
            .local_addr()
            .map_err(|e| LowlinkError::Transport(lowlink_transport::TransportError::BindFailed(e)))?;
        tracing::info!(%addr, "listening");
        self.local_addr = Some(addr);

        let events = self.events_tx.clone();
        let max_connections = self.config.max_connections;
        let idle_timeout = self.config.connection_timeout;
        let unreliable_queue_len = self.config.unreliable_queue_len;
        // Fresh counter per listen: reader tasks from a previous
        // listening period must not decrement the new one.
        let live = Arc::new(AtomicUsize::new(0));

        self.listener_task = Some(self.runtime.spawn(async move {
            loop {
                let conn = match transport.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                        continue;
                    }
                };

                if live.load(Ordering::Acquire) >= max_connections {
                    tracing::warn!(id = %conn.id(), "at capacity, refusing connection");
                    let _ = conn.close().await;
                    continue;
                }
                live.fetch_add(1, Ordering::AcqRel);

                let id = conn.id();
                let (handle, tasks) = peer::channel(Arc::new(conn), unreliable_queue_len);
                if events.send(TransportEvent::Opened { id, peer: handle }).is_err() {
                    return;
                }
                tasks.spawn(events.clone(), idle_timeout, Some(live.clone()));
            }
        }));

        Ok(())
    }

    /// Stops listening and tears down every connection. Idempotent.
    ///
    /// Each live connection gets its disconnect notification delivered
    /// synchronously, before this returns.
    pub fn shutdown(&mut self) {
        if self.listener_task.is_none() && self.connections.is_empty() {
            return;
        }
        tracing::info!(connections = self.connections.len(), "shutting down");

        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
        self.local_addr = None;

        let mut closed: Vec<Remote> = self.connections.drain().map(|(_, r)| r).collect();
        for remote in &mut closed {
            remote.peer.close(self.runtime.handle());
            remote.connection.mark_disconnected(None);
        }
        for remote in &closed {
            for callback in &mut self.disconnected_event {
                callback(&remote.connection);
            }
        }

        // Discard whatever the old listening period left queued. An
        // accept that was never pumped must not surface as a fresh
        // connection after a later listen, and dropping its peer handle
        // closes the socket.
        while self.events_rx.try_recv().is_ok() {}
    }

    // -- Sending -----------------------------------------------------------

    /// Serializes `message` and enqueues it to `target` for in-order,
    /// lossless delivery.
    ///
    /// # Errors
    /// [`LowlinkError::UnknownConnection`] if `target` is not a live
    /// connection; [`LowlinkError::Protocol`] if serialization fails.
    pub fn send_reliable<M: NetworkMessage>(
        &self,
        target: ConnectionId,
        code: MessageCode,
        message: &M,
    ) -> Result<(), LowlinkError> {
        self.require_channel(Channel::Reliable)?;
        let remote = self.live_remote(target)?;
        remote.peer.send_reliable(encode_message(code, message)?);
        Ok(())
    }

    /// Serializes `message` and enqueues it to `target` for best-effort
    /// delivery: it may be dropped under backpressure, never reordered
    /// or duplicated.
    ///
    /// # Errors
    /// As [`send_reliable`](Self::send_reliable).
    pub fn send_unreliable<M: NetworkMessage>(
        &self,
        target: ConnectionId,
        code: MessageCode,
        message: &M,
    ) -> Result<(), LowlinkError> {
        self.require_channel(Channel::Unreliable)?;
        let remote = self.live_remote(target)?;
        remote.peer.send_unreliable(encode_message(code, message)?);
        Ok(())
    }

    fn require_channel(&self, class: Channel) -> Result<(), LowlinkError> {
        if self.config.channels.contains(&class) {
            Ok(())
        } else {
            Err(LowlinkError::ChannelUnavailable(class))
        }
    }

    fn live_remote(&self, target: ConnectionId) -> Result<&Remote, LowlinkError> {
        self.connections
            .get(&target)
            .filter(|r| r.connection.is_connected())
            .ok_or(LowlinkError::UnknownConnection(target))
    }

    // -- The pump ----------------------------------------------------------

    /// Drains every event currently queued and dispatches it
    /// synchronously. Never blocks; call it every tick.
    pub fn process_message(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { id, peer } => {
                if !self.is_active() {
                    // Accepted in the window before shutdown aborted
                    // the listener; dropping the handle closes it.
                    tracing::debug!(%id, "dropping connection accepted during shutdown");
                    return;
                }
                tracing::info!(%id, "connection accepted");
                self.connections.insert(
                    id,
                    Remote {
                        connection: Connection::connected(id),
                        peer,
                    },
                );
                let connection = &self.connections[&id].connection;
                for callback in &mut self.connected_event {
                    callback(connection);
                }
            }
            TransportEvent::Data { id, payload } => {
                if self.connections.contains_key(&id) {
                    self.dispatch_payload(id, &payload);
                } else {
                    tracing::trace!(%id, "data for retired connection");
                }
            }
            TransportEvent::Closed { id, error } => {
                let Some(mut remote) = self.connections.remove(&id) else {
                    tracing::trace!(%id, "close for retired connection");
                    return;
                };
                tracing::info!(%id, ?error, "connection closed");
                remote.connection.mark_disconnected(error);
                for callback in &mut self.disconnected_event {
                    callback(&remote.connection);
                }
            }
            // Connecting and ConnectFailed are client-side events.
            TransportEvent::Connecting { .. } | TransportEvent::ConnectFailed { .. } => {
                tracing::trace!("ignoring client-side transport event");
            }
        }
    }

    fn dispatch_payload(&mut self, id: ConnectionId, payload: &[u8]) {
        let Some(remote) = self.connections.get(&id) else {
            return;
        };
        let mut reader = WireReader::new(payload);
        match reader.read_u16() {
            Ok(raw) => {
                self.registry
                    .dispatch(&remote.connection, MessageCode(raw), &mut reader);
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "dropping undecodable message");
            }
        }
    }

    // -- Status ------------------------------------------------------------

    /// Returns `true` while the listener is up.
    pub fn is_active(&self) -> bool {
        self.listener_task.is_some()
    }

    /// Address actually bound, if listening. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Read-only view of a live connection.
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id).map(|r| &r.connection)
    }

    /// Tears down a single connection. Its disconnect notification is
    /// delivered synchronously, before this returns.
    ///
    /// # Errors
    /// [`LowlinkError::UnknownConnection`] if `target` is not live.
    pub fn disconnect(&mut self, target: ConnectionId) -> Result<(), LowlinkError> {
        let Some(mut remote) = self.connections.remove(&target) else {
            return Err(LowlinkError::UnknownConnection(target));
        };
        tracing::info!(id = %target, "disconnecting");
        remote.peer.close(self.runtime.handle());
        remote.connection.mark_disconnected(None);
        for callback in &mut self.disconnected_event {
            callback(&remote.connection);
        }
        Ok(())
    }
}
