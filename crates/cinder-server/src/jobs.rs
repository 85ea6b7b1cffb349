//! Pipeline stage jobs.
//!
//! Each job locks its connection for the duration of the stage, then
//! either enqueues the next stage's job on that stage's pool, returns
//! the connection to the readiness set, or tears it down. A job that
//! fails structurally (socket error, full follow-up queue) is
//! responsible for calling `close_and_cleanup` itself.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

use cinder_protocol::{parse_frame, Frame};

use crate::connection::{Connection, Phase};
use crate::orchestrator::Shared;
use crate::pool::Job;
use crate::sync;

/// Bytes per read syscall while draining a socket.
const READ_CHUNK: usize = 4096;

/// Longest prefix of an unparsable buffer echoed back in the error reply.
const SNIPPET_LEN: usize = 32;

/// Drains the socket into the connection buffer, then hands the
/// connection to the execute pool.
pub(crate) struct ReadJob {
    shared: Arc<Shared>,
    fd: RawFd,
    conn: Arc<Mutex<Connection>>,
}

impl ReadJob {
    pub(crate) fn new(shared: Arc<Shared>, fd: RawFd, conn: Arc<Mutex<Connection>>) -> Self {
        Self { shared, fd, conn }
    }
}

impl Job for ReadJob {
    fn run(self: Box<Self>) {
        let fd = self.fd;
        let mut guard = sync::lock(&self.conn);
        guard.phase = Phase::Reading;
        debug!(fd, "picked up for reading");

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match (&guard.stream).read(&mut chunk) {
                Ok(0) => {
                    guard.peer_closed = true;
                    break;
                }
                Ok(n) => guard.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(fd, "read failed: {e}");
                    self.shared.close_and_cleanup(fd, Some(guard));
                    return;
                }
            }
        }

        if guard.peer_closed && guard.buf.is_empty() {
            debug!(fd, "peer disconnected");
            self.shared.close_and_cleanup(fd, Some(guard));
            return;
        }

        drop(guard);
        let job = ExecuteJob {
            shared: Arc::clone(&self.shared),
            fd,
            conn: Arc::clone(&self.conn),
        };
        if let Err(e) = self.shared.execute_pool.add_job(Box::new(job)) {
            warn!(fd, "failed to enqueue execute job: {e}");
            self.shared.close_and_cleanup(fd, None);
        }
    }
}

/// Parses the buffered bytes and runs the command against the store.
pub(crate) struct ExecuteJob {
    shared: Arc<Shared>,
    fd: RawFd,
    conn: Arc<Mutex<Connection>>,
}

impl Job for ExecuteJob {
    fn run(self: Box<Self>) {
        let fd = self.fd;
        let mut guard = sync::lock(&self.conn);
        guard.phase = Phase::Parsing;
        debug!(fd, "picked up for parsing");

        match parse_frame(&guard.buf) {
            Ok(Some((frame, consumed))) => {
                guard.buf.advance(consumed);
                let outcome = cinder_store::execute(&frame, &self.shared.store);
                guard.parsed = Some(frame);
                guard.response = Some(outcome.response);
                if outcome.fatal {
                    guard.mark_fatal();
                }
            }
            Ok(None) => {
                // a prefix of a valid frame — wait for the rest, unless
                // the peer can no longer send it
                if guard.peer_closed {
                    debug!(fd, "peer closed mid-frame");
                    self.shared.close_and_cleanup(fd, Some(guard));
                    return;
                }
                debug!(fd, "partial frame, rearming");
                guard.phase = Phase::WaitingForReadiness;
                drop(guard);
                self.shared.requeue_for_readiness(fd);
                return;
            }
            Err(e) => {
                warn!(fd, "could not parse request: {e}");
                let snippet = sanitize_snippet(&guard.buf);
                guard.buf.clear();
                guard.response = Some(Frame::Error(format!(
                    "Unable to parse '{snippet}'. Try again."
                )));
            }
        }

        drop(guard);
        let job = WriteJob {
            shared: Arc::clone(&self.shared),
            fd,
            conn: Arc::clone(&self.conn),
        };
        if let Err(e) = self.shared.write_pool.add_job(Box::new(job)) {
            warn!(fd, "failed to enqueue write job: {e}");
            self.shared.close_and_cleanup(fd, None);
        }
    }
}

/// Writes the response, then recycles or closes the connection.
pub(crate) struct WriteJob {
    shared: Arc<Shared>,
    fd: RawFd,
    conn: Arc<Mutex<Connection>>,
}

impl Job for WriteJob {
    fn run(self: Box<Self>) {
        let fd = self.fd;
        let mut guard = sync::lock(&self.conn);
        guard.phase = Phase::Writing;
        debug!(fd, "picked up for writing");

        let out: Bytes = match &guard.response {
            Some(frame) => {
                let mut buf = BytesMut::new();
                frame.serialize(&mut buf);
                buf.freeze()
            }
            None => Bytes::from_static(guard.fallback),
        };

        if let Err(e) = write_fully(&guard.stream, &out) {
            warn!(fd, "write failed: {e}");
            self.shared.close_and_cleanup(fd, Some(guard));
            return;
        }

        if guard.fatal {
            debug!(fd, "closing after fatal response");
            self.shared.close_and_cleanup(fd, Some(guard));
            return;
        }

        guard.reset();
        drop(guard);
        self.shared.requeue_for_readiness(fd);
        debug!(fd, "response written, rearmed");
    }
}

/// Writes the whole buffer to a non-blocking socket, yielding while the
/// kernel buffer is full.
fn write_fully(stream: &TcpStream, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match (&*stream).write(&buf[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Renders the front of an unparsable buffer printable for the error
/// reply: control bytes become escapes, and the reply itself must stay
/// free of raw CR/LF.
fn sanitize_snippet(buf: &[u8]) -> String {
    let mut out = String::new();
    for &b in buf.iter().take(SNIPPET_LEN) {
        match b {
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push('.'),
        }
    }
    if buf.len() > SNIPPET_LEN {
        out.push_str("...");
    }
    out
}
