//! Protocol error types for RESP parsing and command decoding.

use thiserror::Error;

/// Errors that can occur when decoding the RESP wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input buffer holds a prefix of a valid frame. The caller
    /// should read more data and try again.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The first byte of a frame didn't match any known RESP type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidType(u8),

    /// Failed to parse an integer or length field.
    #[error("invalid number encoding")]
    InvalidNumber,

    /// A bulk string payload was not terminated by `\r\n`.
    #[error("missing CRLF terminator")]
    MissingCrlf,

    /// A bulk string payload contained a raw `\r` or `\n`.
    #[error("string contains CR or LF")]
    EmbeddedCrlf,

    /// An array declared an invalid (negative) length.
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// A frame type that is not supported at its nesting depth. Below
    /// the first array level only bulk strings and nested arrays may
    /// appear.
    #[error("unsupported type in array position: {0:#04x}")]
    Unsupported(u8),

    /// Arrays nested deeper than the parser's limit.
    #[error("nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// A simple string or error frame was not valid UTF-8.
    #[error("invalid utf-8 in string frame")]
    InvalidUtf8,

    /// A well-formed frame that does not decode to a known command.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}
