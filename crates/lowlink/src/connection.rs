//! Per-connection state: identity, liveness, and last error.

use std::fmt;

use lowlink_transport::ConnectionId;

use crate::NetworkError;

/// The liveness state of a logical peer link.
///
/// Client-side connections walk the full machine, with a failure edge
/// straight from Connecting to Disconnected:
///
/// ```text
/// Connecting ──→ Connected ──→ Disconnected
///      │                            ▲
///      └────────(attempt failed)────┘
/// ```
///
/// Server-side connections start at Connected — accept is atomic from
/// the application's viewpoint. Disconnected is terminal; the owning
/// manager discards the identity after delivering the disconnect
/// notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// An outbound attempt is in flight.
    Connecting,
    /// The link is established and can carry messages.
    Connected,
    /// The link is gone (or never existed). Terminal.
    Disconnected,
}

impl ConnectionState {
    /// Returns `true` if the link can carry messages.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// One logical peer link, owned exclusively by its manager.
///
/// Application code only ever sees `&Connection` — in event callbacks
/// and message handlers — and reads identity, liveness, and the last
/// recorded fault through the accessors. It never holds the connection
/// across pump calls, which is what makes use-after-disconnect bugs
/// unrepresentable.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    last_error: Option<NetworkError>,
}

impl Connection {
    /// A placeholder with no identity, used before any attempt exists.
    pub(crate) fn idle() -> Self {
        Self {
            id: ConnectionId::INVALID,
            state: ConnectionState::Disconnected,
            last_error: None,
        }
    }

    /// A client-side link whose attempt is in flight.
    pub(crate) fn connecting(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
            last_error: None,
        }
    }

    /// A server-side link, Connected from birth.
    pub(crate) fn connected(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Connected,
            last_error: None,
        }
    }

    /// The identity of this link. [`ConnectionId::INVALID`] when no
    /// link or attempt exists.
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` while the link can carry messages.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// The current liveness state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The fault recorded on the most recent teardown or failed
    /// attempt. `None` means no fault — including a clean close.
    pub fn last_error(&self) -> Option<NetworkError> {
        self.last_error
    }

    pub(crate) fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.last_error = None;
    }

    pub(crate) fn mark_disconnected(&mut self, error: Option<NetworkError>) {
        self.state = ConnectionState::Disconnected;
        self.last_error = error;
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.state)
    }
}
