//! Manager configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The delivery guarantee of one configured channel.
///
/// Reliable messages are delivered in order with no loss. Unreliable
/// messages may be dropped under backpressure, but never reordered or
/// duplicated relative to other unreliable messages on the same link —
/// right for high-rate data where the latest value beats every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Channel {
    Reliable,
    Unreliable,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable => write!(f, "reliable"),
            Self::Unreliable => write!(f, "unreliable"),
        }
    }
}

/// Configuration for a [`ClientNetworkManager`](crate::ClientNetworkManager).
///
/// Immutable once handed to the manager's constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bound on the connect attempt, and on how long an established
    /// link may stay silent before it is torn down with
    /// [`NetworkError::Timeout`](crate::NetworkError::Timeout).
    pub connection_timeout: Duration,

    /// Delivery classes this manager's sends may use.
    pub channels: Vec<Channel>,

    /// Depth of the unreliable send queue. When the link is backlogged
    /// past this, unreliable sends are dropped at enqueue time. The
    /// effective minimum is 1; a configured 0 is treated as 1.
    pub unreliable_queue_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            channels: vec![Channel::Reliable, Channel::Unreliable],
            unreliable_queue_len: 64,
        }
    }
}

/// Configuration for a [`ServerNetworkManager`](crate::ServerNetworkManager).
///
/// Immutable once handed to the manager's constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Upper bound on concurrent connections. Inbound attempts past the
    /// bound are closed at accept time — never queued — and produce no
    /// connect notification.
    pub max_connections: usize,

    /// Idle-link timeout: a connection that receives nothing for this
    /// long is torn down with
    /// [`NetworkError::Timeout`](crate::NetworkError::Timeout).
    pub connection_timeout: Duration,

    /// Delivery classes this manager's sends may use.
    pub channels: Vec<Channel>,

    /// Depth of each connection's unreliable send queue. The effective
    /// minimum is 1; a configured 0 is treated as 1.
    pub unreliable_queue_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 64,
            connection_timeout: Duration::from_secs(10),
            channels: vec![Channel::Reliable, Channel::Unreliable],
            unreliable_queue_len: 64,
        }
    }
}
