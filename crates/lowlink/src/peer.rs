//! Per-connection I/O tasks and send queues.
//!
//! Each established link gets a reader task and a writer task on the
//! manager's private runtime. The reader turns whole frames into
//! [`TransportEvent`]s; the writer drains two send queues — an
//! unbounded reliable FIFO and a bounded unreliable one whose overflow
//! drops the message. The application thread only ever touches the
//! queue ends inside [`PeerHandle`]; it never waits on the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use lowlink_transport::TcpConnection;

use crate::NetworkError;
use crate::event::TransportEvent;

/// The manager's grip on one live link: send queues plus the socket.
pub(crate) struct PeerHandle {
    reliable_tx: mpsc::UnboundedSender<Vec<u8>>,
    unreliable_tx: mpsc::Sender<Vec<u8>>,
    conn: Arc<TcpConnection>,
}

impl PeerHandle {
    /// Enqueues a reliable message. Delivery order matches enqueue
    /// order with no loss while the link lives; if the link is already
    /// dead the message goes nowhere and the pending `Closed` event
    /// tells the application.
    pub(crate) fn send_reliable(&self, payload: Vec<u8>) {
        let _ = self.reliable_tx.send(payload);
    }

    /// Enqueues an unreliable message. Dropped on the floor when the
    /// queue is full — loss is allowed for this class, reordering and
    /// duplication are not.
    pub(crate) fn send_unreliable(&self, payload: Vec<u8>) {
        use mpsc::error::TrySendError;

        match self.unreliable_tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(id = %self.conn.id(), "unreliable queue full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Shuts the link's write half down, signalling EOF to the peer.
    /// Fire-and-forget: teardown completes on the runtime.
    pub(crate) fn close(&self, handle: &Handle) {
        let conn = Arc::clone(&self.conn);
        handle.spawn(async move {
            let _ = conn.close().await;
        });
    }
}

/// The not-yet-spawned task halves of a peer, split from the handle so
/// the `Opened` event can be queued *before* the reader starts — that
/// is what keeps `Data` behind `Opened` in the event FIFO.
pub(crate) struct PeerTasks {
    conn: Arc<TcpConnection>,
    reliable_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    unreliable_rx: mpsc::Receiver<Vec<u8>>,
}

/// Creates the queue pair for one link.
pub(crate) fn channel(
    conn: Arc<TcpConnection>,
    unreliable_queue_len: usize,
) -> (PeerHandle, PeerTasks) {
    let (reliable_tx, reliable_rx) = mpsc::unbounded_channel();
    let (unreliable_tx, unreliable_rx) = mpsc::channel(unreliable_queue_len.max(1));

    let handle = PeerHandle {
        reliable_tx,
        unreliable_tx,
        conn: Arc::clone(&conn),
    };
    let tasks = PeerTasks {
        conn,
        reliable_rx,
        unreliable_rx,
    };
    (handle, tasks)
}

impl PeerTasks {
    /// Spawns the reader and writer tasks on the current runtime.
    ///
    /// Must be called from runtime context (the accept loop or a
    /// connect task). `live` is the server's live-connection counter,
    /// released when the reader ends.
    pub(crate) fn spawn(
        self,
        events: mpsc::UnboundedSender<TransportEvent>,
        idle_timeout: Duration,
        live: Option<Arc<AtomicUsize>>,
    ) {
        let Self {
            conn,
            mut reliable_rx,
            mut unreliable_rx,
        } = self;

        let writer_conn = Arc::clone(&conn);
        tokio::spawn(async move {
            loop {
                // Reliable traffic first when both queues hold data.
                let payload = tokio::select! {
                    biased;
                    msg = reliable_rx.recv() => msg,
                    msg = unreliable_rx.recv() => msg,
                };
                let Some(payload) = payload else {
                    break; // manager dropped the handle
                };
                if let Err(e) = writer_conn.send(&payload).await {
                    tracing::debug!(id = %writer_conn.id(), error = %e, "send failed, stopping writer");
                    break;
                }
            }
            let _ = writer_conn.close().await;
        });

        tokio::spawn(async move {
            let _live = LiveGuard(live);
            let id = conn.id();
            loop {
                match tokio::time::timeout(idle_timeout, conn.recv()).await {
                    Ok(Ok(Some(payload))) => {
                        if events.send(TransportEvent::Data { id, payload }).is_err() {
                            return; // manager is gone
                        }
                    }
                    Ok(Ok(None)) => {
                        tracing::debug!(%id, "peer closed cleanly");
                        let _ = events.send(TransportEvent::Closed { id, error: None });
                        return;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(%id, error = %e, "receive failed");
                        let _ = events.send(TransportEvent::Closed {
                            id,
                            error: Some(NetworkError::from(&e)),
                        });
                        return;
                    }
                    Err(_elapsed) => {
                        tracing::info!(%id, "idle timeout, closing link");
                        let _ = conn.close().await;
                        let _ = events.send(TransportEvent::Closed {
                            id,
                            error: Some(NetworkError::Timeout),
                        });
                        return;
                    }
                }
            }
        });
    }
}

/// Releases one slot of the server's connection budget when the reader
/// task ends, however it ends.
struct LiveGuard(Option<Arc<AtomicUsize>>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        if let Some(live) = &self.0 {
            live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
