//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding wire data.
///
/// Underruns are the decoder's bread and butter: a peer (or a buggy
/// handler reading past its own payload) asked for more bytes than the
/// buffer holds. Everything else is a malformed field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A read would exceed the bytes remaining in the buffer.
    #[error("buffer underrun: read of {needed} bytes with only {remaining} remaining")]
    Underrun { needed: usize, remaining: usize },

    /// A string's UTF-8 byte length does not fit the u16 length prefix.
    /// Raised at write time, before anything lands in the buffer.
    #[error("string of {0} bytes exceeds the 65535 byte wire limit")]
    StringTooLong(usize),

    /// A length-prefixed string field did not contain valid UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
}
