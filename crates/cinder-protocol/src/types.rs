//! RESP frame types.
//!
//! The [`Frame`] enum represents a single parsed RESP value. Bulk string
//! payloads use `Bytes` so frames can move through the pipeline without
//! copying the data.

use bytes::Bytes;

/// A single RESP protocol frame.
///
/// Covers the five base types: simple strings, errors, integers, bulk
/// strings, and arrays. The null bulk string gets its own variant because
/// it is a distinct wire value from the empty bulk string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string response, e.g. `+OK\r\n`.
    /// Used for short, non-binary status replies.
    Simple(String),

    /// Error response, e.g. `-Invalid command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Bulk string, e.g. `$5\r\nhello\r\n`. An empty bulk string
    /// serializes as `$0\r\n\r\n`.
    Bulk(Bytes),

    /// Null bulk string, `$-1\r\n`. Not the same value as `Bulk("")`.
    Null,

    /// Ordered array of frames, e.g. `*2\r\n$1\r\na\r\n$1\r\nb\r\n`.
    /// May nest.
    Array(Vec<Frame>),
}

impl Frame {
    /// Returns `true` if this frame is the null bulk string.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Returns the textual content of a simple or bulk string frame.
    ///
    /// `None` for every other variant, and for bulk payloads that are not
    /// valid UTF-8. Command names and keys come through here.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) => Some(s),
            Frame::Bulk(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_equality() {
        assert_eq!(Frame::Simple("OK".into()), Frame::Simple("OK".into()));
        assert_ne!(Frame::Simple("OK".into()), Frame::Error("OK".into()));
        assert_eq!(Frame::Integer(7), Frame::Integer(7));
    }

    #[test]
    fn null_is_not_empty_bulk() {
        assert_ne!(Frame::Null, Frame::Bulk(Bytes::new()));
        assert!(Frame::Null.is_null());
        assert!(!Frame::Bulk(Bytes::new()).is_null());
    }

    #[test]
    fn as_text() {
        assert_eq!(Frame::Simple("GET".into()).as_text(), Some("GET"));
        assert_eq!(
            Frame::Bulk(Bytes::from_static(b"key")).as_text(),
            Some("key")
        );
        assert_eq!(Frame::Bulk(Bytes::from_static(b"\xff")).as_text(), None);
        assert_eq!(Frame::Integer(1).as_text(), None);
        assert_eq!(Frame::Null.as_text(), None);
    }
}
