//! Wire protocol for Lowlink.
//!
//! This crate defines the byte-level "language" that the client and
//! server managers speak:
//!
//! - **Wire Codec** ([`WireWriter`], [`WireReader`]) — fixed, versionless
//!   big-endian serialization of primitives, length-prefixed strings,
//!   and raw byte spans.
//! - **Message surface** ([`MessageCode`], [`NetworkMessage`]) — how an
//!   application payload declares its own serialize/deserialize pair and
//!   is routed by a numeric code.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while encoding
//!   or decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between the transport (framed bytes) and the
//! session layer (connections and handlers). It knows nothing about
//! sockets or connection identity — only how values become bytes and
//! come back.
//!
//! ```text
//! Transport (frames) → Protocol (code + payload) → Session (handlers)
//! ```
//!
//! There is no schema versioning on the wire: the Nth read must match
//! the Nth write in type and order. A mismatch corrupts every read that
//! follows — this is a caller contract, not a runtime check.

mod error;
mod message;
mod reader;
mod writer;

pub use error::ProtocolError;
pub use message::{MessageCode, NetworkMessage, encode_message};
pub use reader::WireReader;
pub use writer::WireWriter;
