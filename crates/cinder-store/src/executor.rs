//! Command execution against the partitioned store.
//!
//! Takes a parsed frame, decodes it as a command, routes it to the
//! store, and produces the reply frame. Every per-command failure is
//! turned into an error reply here; the `fatal` flag is reserved for
//! conditions under which no structured reply can be produced at all.
//!
//! ## stored representation
//!
//! SET stores the RESP serialization of its value argument, and GET
//! re-parses those bytes into a frame. `SET x 1` therefore stores
//! `$1\r\n1\r\n` and a later `GET x` replies with that bulk string,
//! not with `:1\r\n`.

use cinder_protocol::{Command, Frame};
use tracing::warn;

use crate::store::PartitionedStore;

/// The result of executing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// The connection cannot continue and must be closed after the
    /// response (if any) is written.
    pub fatal: bool,
    /// The reply to serialize back to the client.
    pub response: Frame,
}

impl Outcome {
    fn reply(response: Frame) -> Self {
        Self {
            fatal: false,
            response,
        }
    }
}

/// Executes one parsed frame against the store.
///
/// Frames that do not decode to a command get the non-fatal
/// `Invalid command` reply; the connection is recycled either way.
pub fn execute(frame: &Frame, store: &PartitionedStore) -> Outcome {
    let command = match Command::from_frame(frame) {
        Ok(command) => command,
        Err(e) => {
            warn!("rejected command: {e}");
            return Outcome::reply(Frame::Error("Invalid command".into()));
        }
    };

    match command {
        Command::Get { key } => Outcome::reply(get(&key, store)),
        Command::Set { key, value } => Outcome::reply(set(key, &value, store)),
        Command::Del { keys } => Outcome::reply(del(&keys, store)),
    }
}

/// GET: an absent key is the null bulk string. Stored bytes are the
/// serialization written by SET; they are re-parsed into the reply
/// frame. Bytes that fail to re-parse mean the store invariant was
/// broken — logged, and the client still gets a null rather than a
/// failed connection.
fn get(key: &str, store: &PartitionedStore) -> Frame {
    let stored = match store.get(key) {
        Ok(stored) => stored,
        Err(e) => {
            warn!(key, "get failed: {e}");
            return Frame::Null;
        }
    };

    match stored {
        Some(bytes) => match cinder_protocol::parse_frame(&bytes) {
            Ok(Some((frame, _))) => frame,
            Ok(None) | Err(_) => {
                warn!(key, "stored value does not parse as a frame");
                Frame::Null
            }
        },
        None => Frame::Null,
    }
}

/// SET: stores the serialized form of the value argument.
fn set(key: String, value: &Frame, store: &PartitionedStore) -> Frame {
    match store.set(key, value.to_bytes()) {
        Ok(()) => Frame::Simple("OK".into()),
        Err(e) => {
            warn!("set failed: {e}");
            Frame::Error("Failed to set the value".into())
        }
    }
}

/// DEL: counts the keys that were actually present and removed.
fn del(keys: &[String], store: &PartitionedStore) -> Frame {
    let mut removed = 0i64;
    for key in keys {
        match store.del(key) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(%key, "del failed: {e}"),
        }
    }
    Frame::Integer(removed)
}
