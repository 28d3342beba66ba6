//! Chat Message Codec
//!
//! Wire format for text messages exchanged over a session:
//! UTF-8 bytes of the form `<sender_name>#<body>`.
//!
//! The split uses the first occurrence of the delimiter, so bodies may
//! themselves contain `'#'` while sender names must not.

/// Delimiter between sender name and message body on the wire
pub const MESSAGE_DELIMITER: char = '#';

/// One chat message, locally composed or decoded from an inbound chunk.
///
/// `is_local` records which side of the link composed the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Message body
    pub body: String,
    /// Display name of the sending adapter
    pub sender_name: String,
    /// Whether this message originated on the local device
    pub is_local: bool,
}

impl ChatMessage {
    /// Create a locally-originated message ready for sending
    pub fn outgoing(body: impl Into<String>, sender_name: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            sender_name: sender_name.into(),
            is_local: true,
        }
    }

    /// Decode an inbound chunk into a message.
    ///
    /// Invalid UTF-8 is replaced rather than rejected. A chunk without a
    /// delimiter decodes with an empty sender name.
    pub fn decode(chunk: &[u8], is_local: bool) -> Self {
        let text = String::from_utf8_lossy(chunk);
        let (sender_name, body) = match text.split_once(MESSAGE_DELIMITER) {
            Some((name, body)) => (name.to_string(), body.to_string()),
            None => (String::new(), text.into_owned()),
        };
        Self {
            body,
            sender_name,
            is_local,
        }
    }

    /// Encode this message for the wire
    pub fn encode(&self) -> Vec<u8> {
        format!("{}{}{}", self.sender_name, MESSAGE_DELIMITER, self.body).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let msg = ChatMessage::outgoing("hello", "alice");
        let decoded = ChatMessage::decode(&msg.encode(), true);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_body_may_contain_delimiter() {
        let msg = ChatMessage::outgoing("hi#there", "A");
        let bytes = msg.encode();
        assert_eq!(bytes, b"A#hi#there");

        let decoded = ChatMessage::decode(&bytes, false);
        assert_eq!(decoded.sender_name, "A");
        assert_eq!(decoded.body, "hi#there");
        assert!(!decoded.is_local);

        // Wire round trip stays byte-identical
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_decode_without_delimiter() {
        let decoded = ChatMessage::decode(b"no delimiter here", false);
        assert_eq!(decoded.sender_name, "");
        assert_eq!(decoded.body, "no delimiter here");
    }

    #[test]
    fn test_decode_replaces_invalid_utf8() {
        let decoded = ChatMessage::decode(&[b'A', b'#', 0xff, 0xfe], false);
        assert_eq!(decoded.sender_name, "A");
        assert!(!decoded.body.is_empty());
    }
}
