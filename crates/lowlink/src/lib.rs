//! Lowlink: a small connection-oriented session layer.
//!
//! Two managers with a shared model: [`ServerNetworkManager`] accepts
//! connections, [`ClientNetworkManager`] makes one. Both are driven by
//! a non-blocking pump — the application calls `process_message()`
//! every tick and all lifecycle callbacks and message handlers run
//! synchronously inside that call. Background I/O runs on a private
//! runtime owned by each manager; nothing ever calls back from another
//! thread.
//!
//! Messages are structs implementing
//! [`NetworkMessage`](lowlink_protocol::NetworkMessage), identified on
//! the wire by a [`MessageCode`](lowlink_protocol::MessageCode) and
//! dispatched to handlers registered per code.

mod client;
mod config;
mod connection;
mod error;
mod event;
mod peer;
mod registry;
mod server;

pub use client::ClientNetworkManager;
pub use config::{Channel, ClientConfig, ServerConfig};
pub use connection::{Connection, ConnectionState};
pub use error::{LowlinkError, NetworkError};
pub use registry::{Handler, HandlerRegistry};
pub use server::ServerNetworkManager;

pub use lowlink_protocol::{
    MessageCode, NetworkMessage, ProtocolError, WireReader, WireWriter, encode_message,
};
pub use lowlink_transport::{ConnectionId, TransportError};
