//! Message surface: codes and the serialize/deserialize seam.

use std::fmt;

use crate::{ProtocolError, WireReader, WireWriter};

/// Application-defined identifier routing a payload to its handler.
///
/// A newtype over `u16` so a message code can't be confused with any
/// other small integer on an API boundary. The code namespace is shared
/// across every message kind registered on one manager; applications
/// conventionally declare them as constants next to the message type:
///
/// ```rust
/// use lowlink_protocol::MessageCode;
///
/// const CHAT_MESSAGE: MessageCode = MessageCode(10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageCode(pub u16);

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// A payload that knows how to cross the wire.
///
/// Implementors write their fields with a [`WireWriter`] and read them
/// back, in the same order, with a [`WireReader`]. The framework never
/// inspects the payload — it only prepends the message code and frames
/// the result for the transport.
pub trait NetworkMessage {
    /// Writes this message's fields to the writer.
    fn serialize(&self, writer: &mut WireWriter) -> Result<(), ProtocolError>;

    /// Reads a message of this type from the reader.
    fn deserialize(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError>
    where
        Self: Sized;
}

/// Encodes a message into its wire shape: `[code: u16][payload]`.
///
/// This is the byte sequence handed to the transport, which wraps it in
/// its own length frame.
pub fn encode_message<M: NetworkMessage>(
    code: MessageCode,
    message: &M,
) -> Result<Vec<u8>, ProtocolError> {
    let mut writer = WireWriter::new();
    writer.write_u16(code.0);
    message.serialize(&mut writer)?;
    Ok(writer.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Greeting {
        text: String,
        urgent: bool,
    }

    impl NetworkMessage for Greeting {
        fn serialize(&self, writer: &mut WireWriter) -> Result<(), ProtocolError> {
            writer.write_string(&self.text)?;
            writer.write_bool(self.urgent);
            Ok(())
        }

        fn deserialize(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
            Ok(Self {
                text: reader.read_string()?,
                urgent: reader.read_bool()?,
            })
        }
    }

    #[test]
    fn test_message_code_display() {
        assert_eq!(MessageCode(10).to_string(), "msg-10");
    }

    #[test]
    fn test_encode_message_prepends_code() {
        let msg = Greeting {
            text: "hi".into(),
            urgent: false,
        };
        let bytes = encode_message(MessageCode(0x0102), &msg).unwrap();
        assert_eq!(&bytes[..2], &[0x01, 0x02]);
    }

    #[test]
    fn test_message_round_trip() {
        let original = Greeting {
            text: "hello".into(),
            urgent: true,
        };
        let bytes = encode_message(MessageCode(10), &original).unwrap();

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_u16().unwrap(), 10);
        let decoded = Greeting::deserialize(&mut reader).unwrap();
        assert_eq!(decoded, original);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_encode_message_propagates_serialize_error() {
        let msg = Greeting {
            text: "z".repeat(65536),
            urgent: false,
        };
        assert!(matches!(
            encode_message(MessageCode(1), &msg),
            Err(ProtocolError::StringTooLong(_))
        ));
    }
}
