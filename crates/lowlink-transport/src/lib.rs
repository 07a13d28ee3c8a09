//! Transport layer for Lowlink.
//!
//! Raw TCP with message framing: every transport message is a u32
//! length prefix followed by the message bytes, so partial receives are
//! reassembled into whole messages before the session layer ever sees
//! them. This framing is distinct from the Wire Codec's in-payload
//! framing — the transport neither knows nor cares what the bytes mean.

mod error;
mod framing;
mod tcp;

pub use error::TransportError;
pub use framing::{MAX_FRAME_LEN, read_frame, write_frame};
pub use tcp::{TcpConnection, TcpTransport, allocate_connection_id};

use std::fmt;

/// Opaque identifier for a connection.
///
/// Zero is reserved as the "no connection" value; real ids are
/// allocated from 1 upward and are unique among the live connections of
/// a manager (ids are never reused while a connection with that id is
/// still being torn down).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u32);

impl ConnectionId {
    /// The reserved "no connection" identity.
    pub const INVALID: ConnectionId = ConnectionId(0);

    /// Creates a `ConnectionId` from a raw `u32`.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying `u32` value.
    pub fn into_inner(self) -> u32 {
        self.0
    }

    /// Returns `true` if this id names a real connection.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
