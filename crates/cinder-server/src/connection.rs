//! Per-connection state.
//!
//! One [`Connection`] exists per accepted socket, owned by the
//! orchestrator's registry as `Arc<Mutex<Connection>>`. A pipeline stage
//! locks it for the duration of the stage; at most one pipeline job
//! exists per connection at any time, so stages never overlap.

use std::net::{Shutdown, TcpStream};

use bytes::BytesMut;
use cinder_protocol::Frame;

/// Fallback reply written when a connection has no structured response.
pub const FALLBACK_ERROR: &[u8] = b"-ERROR\r\n";

/// Fallback reply for a fatal condition that produced no response.
pub const FALLBACK_UNEXPECTED: &[u8] = b"-Unexpected Error\r\n";

/// Where a connection currently sits in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepted but not yet monitored for readiness.
    Accepted,
    /// Armed with the kernel readiness facility.
    WaitingForReadiness,
    /// Readable; a read job is queued but not yet picked up.
    WaitingForReadJob,
    /// A read worker is draining the socket.
    Reading,
    /// An execute worker is parsing and running the command.
    Parsing,
    /// A write worker is sending the response.
    Writing,
    /// Terminal. The socket is being torn down.
    Closing,
}

/// The per-socket record carried through the pipeline.
#[derive(Debug)]
pub struct Connection {
    /// The client socket, in non-blocking mode.
    pub stream: TcpStream,
    /// Bytes read but not yet parsed.
    pub buf: BytesMut,
    /// The most recently parsed request frame.
    pub parsed: Option<Frame>,
    /// The response awaiting the write stage.
    pub response: Option<Frame>,
    /// The connection must close after the next write.
    pub fatal: bool,
    /// The peer half-closed its side; no more bytes will arrive.
    pub peer_closed: bool,
    /// Fixed reply used when `response` is absent at write time.
    pub fallback: &'static [u8],
    pub phase: Phase,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            parsed: None,
            response: None,
            fatal: false,
            peer_closed: false,
            fallback: FALLBACK_ERROR,
            phase: Phase::Accepted,
        }
    }

    /// Clears request state and returns the connection to the readiness
    /// phase for its next command.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.parsed = None;
        self.response = None;
        self.fatal = false;
        self.peer_closed = false;
        self.fallback = FALLBACK_ERROR;
        self.phase = Phase::WaitingForReadiness;
    }

    /// Marks the connection fatal with the unexpected-error fallback.
    pub fn mark_fatal(&mut self) {
        self.fatal = true;
        self.fallback = FALLBACK_UNEXPECTED;
    }

    /// Shuts both socket directions down. The descriptor itself closes
    /// when the last handle to this connection drops.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
