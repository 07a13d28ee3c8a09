//! Error types for the session layer.

use std::fmt;

use lowlink_protocol::{MessageCode, ProtocolError};
use lowlink_transport::{ConnectionId, TransportError};

use crate::config::Channel;

/// Transport-level fault recorded on a connection's `last_error`.
///
/// These never surface as return values from the pump — they ride on
/// the connect-failure or disconnect notification and stay readable on
/// the [`Connection`](crate::Connection) afterwards. A clean close
/// (local request or orderly peer shutdown) leaves `last_error` empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// The remote end refused the connection attempt.
    ConnectionRefused,
    /// The attempt or the idle link exceeded its timeout.
    Timeout,
    /// The transport failed underneath an established link.
    TransportReset,
    /// An inbound payload could not be decoded.
    Decode,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::Timeout => write!(f, "timed out"),
            Self::TransportReset => write!(f, "transport reset"),
            Self::Decode => write!(f, "decode failed"),
        }
    }
}

impl From<&TransportError> for NetworkError {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::ConnectionRefused => Self::ConnectionRefused,
            TransportError::Timeout => Self::Timeout,
            _ => Self::TransportReset,
        }
    }
}

/// Errors reported synchronously at a manager call site.
///
/// These are the programmer-misuse and setup failures the caller can
/// act on immediately. Transport faults on a live link are never raised
/// here — they arrive as events through the pump.
#[derive(Debug, thiserror::Error)]
pub enum LowlinkError {
    /// A handler is already registered for this message code.
    /// The first registration stays active.
    #[error("handler already registered for {0}")]
    DuplicateHandler(MessageCode),

    /// A send was attempted with no Connected link.
    #[error("no active connection")]
    NotConnected,

    /// The target id does not name a currently Connected connection.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// `connect` was called while a connection or attempt is active.
    #[error("already connected or connecting")]
    AlreadyConnected,

    /// `listen` was called while the server is already listening.
    #[error("already listening")]
    AlreadyListening,

    /// The requested delivery class has no configured channel.
    #[error("no {0} channel configured")]
    ChannelUnavailable(Channel),

    /// The manager's background runtime could not be built.
    #[error("runtime setup failed: {0}")]
    Runtime(#[source] std::io::Error),

    /// A protocol-level error (encode failed at the call site).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A transport-level error (bind failed, port unavailable).
    #[error(transparent)]
    Transport(#[from] TransportError),
}
