//! Internal queue events: the hand-off from background I/O to the pump.
//!
//! Background producers (the accept loop, connect attempts, and each
//! connection's reader task) push these into the manager's single
//! unbounded channel. The pump is the only consumer; it drains with
//! `try_recv` and turns each event into state transitions and callback
//! invocations on the application thread. Application callbacks are
//! never invoked from a producer.

use lowlink_transport::ConnectionId;

use crate::NetworkError;
use crate::peer::PeerHandle;

/// One completed result surfaced by the transport side.
///
/// The channel is FIFO, and every producer for a given id pushes its
/// events in real transport order, so per-connection ordering holds by
/// construction: `Opened` precedes any `Data`, which precede the single
/// `Closed`.
pub(crate) enum TransportEvent {
    /// A client connect attempt has started (queued by `connect` itself
    /// so the notification flows through the pump like the rest).
    Connecting { id: ConnectionId },

    /// A client connect attempt failed; no link was established.
    ConnectFailed {
        id: ConnectionId,
        error: NetworkError,
    },

    /// A link was established: outbound attempt succeeded, or an
    /// inbound connection was accepted. Carries the handle the manager
    /// uses to feed the link's writer task.
    Opened { id: ConnectionId, peer: PeerHandle },

    /// One whole inbound message arrived on an established link.
    Data {
        id: ConnectionId,
        payload: Vec<u8>,
    },

    /// The link is gone. `error` is `None` for a clean peer close.
    /// Pushed exactly once per link, after every `Data` from it.
    Closed {
        id: ConnectionId,
        error: Option<NetworkError>,
    },
}
