//! Command decoding from RESP frames.
//!
//! Converts a parsed [`Frame`] (expected to be an array) into a typed
//! [`Command`]. This keeps protocol-level concerns separate from the
//! store that actually executes commands.

use crate::error::ProtocolError;
use crate::types::Frame;

/// A decoded client command, ready for execution.
///
/// Names are matched case-insensitively. Commands may carry more array
/// elements than they use; the extras are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// GET <key>. Returns the stored value or the null bulk string.
    Get { key: String },

    /// SET <key> <value>. The value is kept as a frame; the store holds
    /// its serialized form.
    Set { key: String, value: Frame },

    /// DEL <key> [key ...]. Returns the number of keys removed.
    Del { keys: Vec<String> },
}

impl Command {
    /// Decodes a [`Frame`] into a [`Command`].
    ///
    /// Expects an array whose first element is the command name as a
    /// simple or bulk string and whose key arguments are simple or bulk
    /// strings. Anything else is an [`ProtocolError::InvalidCommand`].
    pub fn from_frame(frame: &Frame) -> Result<Command, ProtocolError> {
        let frames = match frame {
            Frame::Array(frames) => frames,
            _ => return Err(ProtocolError::InvalidCommand("expected array".into())),
        };

        let name = match frames.first() {
            Some(f) => extract_string(f)?,
            None => return Err(ProtocolError::InvalidCommand("empty array".into())),
        };

        match name.to_ascii_lowercase().as_str() {
            "get" => parse_get(&frames[1..]),
            "set" => parse_set(&frames[1..]),
            "del" => parse_del(&frames[1..]),
            _ => Err(ProtocolError::InvalidCommand(format!(
                "unknown command '{name}'"
            ))),
        }
    }
}

/// Extracts a UTF-8 string from a bulk or simple string frame.
fn extract_string(frame: &Frame) -> Result<String, ProtocolError> {
    frame
        .as_text()
        .map(str::to_owned)
        .ok_or_else(|| ProtocolError::InvalidCommand("expected a string argument".into()))
}

fn parse_get(args: &[Frame]) -> Result<Command, ProtocolError> {
    match args.first() {
        Some(f) => Ok(Command::Get {
            key: extract_string(f)?,
        }),
        None => Err(ProtocolError::InvalidCommand("GET needs a key".into())),
    }
}

fn parse_set(args: &[Frame]) -> Result<Command, ProtocolError> {
    if args.len() < 2 {
        return Err(ProtocolError::InvalidCommand(
            "SET needs a key and a value".into(),
        ));
    }
    let key = extract_string(&args[0])?;
    Ok(Command::Set {
        key,
        value: args[1].clone(),
    })
}

fn parse_del(args: &[Frame]) -> Result<Command, ProtocolError> {
    if args.is_empty() {
        return Err(ProtocolError::InvalidCommand(
            "DEL needs at least one key".into(),
        ));
    }
    let keys = args
        .iter()
        .map(extract_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Command::Del { keys })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn bulk(s: &str) -> Frame {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn decode_get() {
        let frame = Frame::Array(vec![bulk("GET"), bulk("mykey")]);
        assert_eq!(
            Command::from_frame(&frame).unwrap(),
            Command::Get {
                key: "mykey".into()
            }
        );
    }

    #[test]
    fn decode_get_lowercase() {
        let frame = Frame::Array(vec![bulk("get"), bulk("k")]);
        assert!(matches!(
            Command::from_frame(&frame).unwrap(),
            Command::Get { .. }
        ));
    }

    #[test]
    fn decode_set() {
        let frame = Frame::Array(vec![bulk("SeT"), bulk("k"), bulk("v")]);
        assert_eq!(
            Command::from_frame(&frame).unwrap(),
            Command::Set {
                key: "k".into(),
                value: bulk("v"),
            }
        );
    }

    #[test]
    fn decode_del_multiple_keys() {
        let frame = Frame::Array(vec![bulk("DEL"), bulk("a"), bulk("b"), bulk("c")]);
        assert_eq!(
            Command::from_frame(&frame).unwrap(),
            Command::Del {
                keys: vec!["a".into(), "b".into(), "c".into()]
            }
        );
    }

    #[test]
    fn simple_string_command_name_accepted() {
        let frame = Frame::Array(vec![Frame::Simple("GET".into()), bulk("k")]);
        assert!(Command::from_frame(&frame).is_ok());
    }

    #[test]
    fn simple_string_command_name_decodes_from_wire_bytes() {
        use crate::parse::parse_frame;

        let (frame, consumed) = parse_frame(b"*2\r\n+GET\r\n$1\r\nk\r\n")
            .expect("parse should not error")
            .expect("parse should return a frame");
        assert_eq!(consumed, b"*2\r\n+GET\r\n$1\r\nk\r\n".len());
        assert_eq!(
            Command::from_frame(&frame).unwrap(),
            Command::Get { key: "k".into() }
        );
    }

    #[test]
    fn unknown_command_rejected() {
        let frame = Frame::Array(vec![bulk("PING")]);
        assert!(matches!(
            Command::from_frame(&frame),
            Err(ProtocolError::InvalidCommand(_))
        ));
    }

    #[test]
    fn missing_arguments_rejected() {
        assert!(Command::from_frame(&Frame::Array(vec![bulk("GET")])).is_err());
        assert!(Command::from_frame(&Frame::Array(vec![bulk("SET"), bulk("k")])).is_err());
        assert!(Command::from_frame(&Frame::Array(vec![bulk("DEL")])).is_err());
    }

    #[test]
    fn non_array_rejected() {
        assert!(Command::from_frame(&Frame::Simple("GET".into())).is_err());
        assert!(Command::from_frame(&Frame::Integer(1)).is_err());
    }

    #[test]
    fn non_string_key_rejected() {
        let frame = Frame::Array(vec![bulk("GET"), Frame::Null]);
        assert!(Command::from_frame(&frame).is_err());
        let frame = Frame::Array(vec![bulk("DEL"), bulk("a"), Frame::Array(vec![])]);
        assert!(Command::from_frame(&frame).is_err());
    }

    #[test]
    fn extra_arguments_ignored() {
        let frame = Frame::Array(vec![bulk("GET"), bulk("k"), bulk("junk")]);
        assert_eq!(
            Command::from_frame(&frame).unwrap(),
            Command::Get { key: "k".into() }
        );
    }
}
