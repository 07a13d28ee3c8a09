//! The message registry: routes inbound payloads to handlers by code.

use std::collections::HashMap;

use lowlink_protocol::{MessageCode, ProtocolError, WireReader};

use crate::{Connection, LowlinkError};

/// A registered message handler.
///
/// Invoked synchronously during the pump with a read-only view of the
/// originating connection and a reader positioned just past the message
/// code. A handler's `Err` is contained at the dispatch boundary; it
/// never unwinds the pump.
pub type Handler =
    Box<dyn FnMut(&Connection, &mut WireReader<'_>) -> Result<(), ProtocolError> + Send>;

/// Maps message codes to deserialize-and-dispatch handlers.
///
/// Not thread-safe by design: the registry is owned by a manager and
/// only ever touched from the application thread, so it is a plain
/// `HashMap` with no hidden locking.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageCode, Handler>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Stores `handler` for `code`.
    ///
    /// # Errors
    /// Returns [`LowlinkError::DuplicateHandler`] if `code` is already
    /// registered; the first handler stays active.
    pub fn register<F>(&mut self, code: MessageCode, handler: F) -> Result<(), LowlinkError>
    where
        F: FnMut(&Connection, &mut WireReader<'_>) -> Result<(), ProtocolError> + Send + 'static,
    {
        use std::collections::hash_map::Entry;

        match self.handlers.entry(code) {
            Entry::Occupied(_) => Err(LowlinkError::DuplicateHandler(code)),
            Entry::Vacant(slot) => {
                slot.insert(Box::new(handler));
                Ok(())
            }
        }
    }

    /// Routes one inbound message to its handler.
    ///
    /// An unknown code drops the message with a debug log — a peer
    /// sending codes we never registered must not crash the manager. A
    /// failing handler is logged at warn and otherwise ignored, keeping
    /// the pump resilient to one bad handler.
    pub fn dispatch(&mut self, conn: &Connection, code: MessageCode, reader: &mut WireReader<'_>) {
        let Some(handler) = self.handlers.get_mut(&code) else {
            tracing::debug!(conn = %conn.connection_id(), %code, "no handler registered, dropping message");
            return;
        };

        if let Err(e) = handler(conn, reader) {
            tracing::warn!(conn = %conn.connection_id(), %code, error = %e, "handler failed");
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
